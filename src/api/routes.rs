use serde::Deserialize;
use tracing::{debug, error, warn};

use super::http::{HttpRequest, HttpResponse};
use crate::app::App;
use crate::db::Storage;
use crate::error::{AppError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    Register,
    Login,
    ListCategories,
    CreateCategory,
    ListIdeas,
    GetIdea(i64),
    CreateIdea,
    UpdateIdea(i64),
    DeleteIdea(i64),
    ListQuestions,
    CreateQuestion,
    ListAnswers(i64),
    SaveAnswer,
    UpdateAnswer(i64),
    ListVersions(i64),
    CreateVersion,
    RestoreVersion { idea_id: i64, version_id: i64 },
    GenerateQuestions(i64),
    SuggestQuestions(i64),
    QuestionFeedback,
    GetSettings(i64),
    UpdateSettings(i64),
    ListApiConfigs,
    SaveApiConfig,
    UpdateApiConfig(i64),
    DeleteApiConfig(i64),
    TestConnection,
}

#[derive(Debug, PartialEq, Eq)]
pub enum RouteError {
    NoRoute,
    MethodNotAllowed,
    InvalidId(String),
}

#[derive(Debug, Deserialize)]
struct ConnectionRequest {
    provider: String,
}

/// Maps a method and path onto a [`Route`]. Paths are matched on their
/// segments; a trailing slash is ignored.
pub fn resolve(method: &str, path: &str) -> std::result::Result<Route, RouteError> {
    let segments: Vec<&str> = path
        .trim_end_matches('/')
        .split('/')
        .filter(|s| !s.is_empty())
        .collect();

    let allow = |routes: &[(&str, Route)]| {
        routes
            .iter()
            .find(|(m, _)| *m == method)
            .map(|(_, route)| *route)
            .ok_or(RouteError::MethodNotAllowed)
    };

    match segments.as_slice() {
        ["api", "register"] => allow(&[("POST", Route::Register)]),
        ["api", "login"] => allow(&[("POST", Route::Login)]),
        ["api", "categories"] => allow(&[
            ("GET", Route::ListCategories),
            ("POST", Route::CreateCategory),
        ]),
        ["api", "ideas"] => allow(&[("GET", Route::ListIdeas), ("POST", Route::CreateIdea)]),
        ["api", "ideas", id] => {
            let id = parse_id(id)?;
            allow(&[
                ("GET", Route::GetIdea(id)),
                ("PUT", Route::UpdateIdea(id)),
                ("DELETE", Route::DeleteIdea(id)),
            ])
        }
        ["api", "ideas", id, action] => {
            let id = parse_id(id)?;
            match *action {
                "answers" => allow(&[("GET", Route::ListAnswers(id))]),
                "versions" => allow(&[("GET", Route::ListVersions(id))]),
                "generate-questions" => allow(&[("POST", Route::GenerateQuestions(id))]),
                "suggest-questions" => allow(&[("POST", Route::SuggestQuestions(id))]),
                _ => Err(RouteError::NoRoute),
            }
        }
        ["api", "ideas", id, "restore", version_id] => {
            let idea_id = parse_id(id)?;
            let version_id = parse_id(version_id)?;
            allow(&[("POST", Route::RestoreVersion { idea_id, version_id })])
        }
        ["api", "questions"] => allow(&[
            ("GET", Route::ListQuestions),
            ("POST", Route::CreateQuestion),
        ]),
        ["api", "answers"] => allow(&[("POST", Route::SaveAnswer)]),
        ["api", "answers", id] => {
            let id = parse_id(id)?;
            allow(&[("PUT", Route::UpdateAnswer(id))])
        }
        ["api", "versions"] => allow(&[("POST", Route::CreateVersion)]),
        ["api", "question-feedback"] => allow(&[("POST", Route::QuestionFeedback)]),
        ["api", "settings", user_id] => {
            let user_id = parse_id(user_id)?;
            allow(&[
                ("GET", Route::GetSettings(user_id)),
                ("PUT", Route::UpdateSettings(user_id)),
            ])
        }
        ["api", "api-configs"] => allow(&[
            ("GET", Route::ListApiConfigs),
            ("POST", Route::SaveApiConfig),
        ]),
        ["api", "api-configs", id] => {
            let id = parse_id(id)?;
            allow(&[
                ("PUT", Route::UpdateApiConfig(id)),
                ("DELETE", Route::DeleteApiConfig(id)),
            ])
        }
        ["api", "test-ai-connection"] => allow(&[("POST", Route::TestConnection)]),
        _ => Err(RouteError::NoRoute),
    }
}

fn parse_id(raw: &str) -> std::result::Result<i64, RouteError> {
    raw.parse()
        .map_err(|_| RouteError::InvalidId(raw.to_string()))
}

/// Resolves and runs one request. Never fails: every error becomes a JSON
/// error response.
pub async fn dispatch<S: Storage>(app: &App<S>, request: HttpRequest) -> HttpResponse {
    let route = match resolve(&request.method, &request.path) {
        Ok(route) => route,
        Err(RouteError::NoRoute) => {
            debug!(method = %request.method, path = %request.path, "no route");
            return HttpResponse::error(
                404,
                "NOT_FOUND",
                &format!("No route for {} {}", request.method, request.path),
            );
        }
        Err(RouteError::MethodNotAllowed) => {
            return HttpResponse::error(
                405,
                "METHOD_NOT_ALLOWED",
                &format!("{} is not supported on {}", request.method, request.path),
            );
        }
        Err(RouteError::InvalidId(raw)) => {
            return HttpResponse::error(
                400,
                "VALIDATION",
                &format!("Invalid id '{raw}' in path"),
            );
        }
    };

    debug!(method = %request.method, path = %request.path, ?route, "dispatching");
    match handle(app, route, &request).await {
        Ok(response) => response,
        Err(err) => error_response(&request, &err),
    }
}

fn error_response(request: &HttpRequest, err: &AppError) -> HttpResponse {
    if err.is_internal() {
        error!(method = %request.method, path = %request.path, error = %err, "request failed");
    } else {
        warn!(method = %request.method, path = %request.path, error = %err, "request rejected");
    }
    HttpResponse::error(err.status(), err.code(), &err.public_message())
}

async fn handle<S: Storage>(app: &App<S>, route: Route, req: &HttpRequest) -> Result<HttpResponse> {
    match route {
        Route::Register => HttpResponse::created(&app.register(req.json()?).await?),
        Route::Login => HttpResponse::ok(&app.login(req.json()?).await?),

        Route::ListCategories => {
            HttpResponse::ok(&app.list_categories(req.query_id("userId")?).await?)
        }
        Route::CreateCategory => HttpResponse::created(&app.create_category(req.json()?).await?),

        Route::ListIdeas => {
            let user_id = req
                .query_id("userId")?
                .ok_or_else(|| AppError::Validation("userId is required".to_string()))?;
            HttpResponse::ok(&app.list_ideas(user_id).await?)
        }
        Route::GetIdea(id) => HttpResponse::ok(&app.get_idea(id).await?),
        Route::CreateIdea => HttpResponse::created(&app.create_idea(req.json()?).await?),
        Route::UpdateIdea(id) => HttpResponse::ok(&app.update_idea(id, req.json()?).await?),
        Route::DeleteIdea(id) => {
            app.delete_idea(id).await?;
            Ok(HttpResponse::no_content())
        }

        Route::ListQuestions => {
            HttpResponse::ok(&app.list_questions(req.query_id("categoryId")?).await?)
        }
        Route::CreateQuestion => HttpResponse::created(&app.create_question(req.json()?).await?),

        Route::ListAnswers(idea_id) => HttpResponse::ok(&app.list_answers(idea_id).await?),
        Route::SaveAnswer => HttpResponse::ok(&app.save_answer(req.json()?).await?),
        Route::UpdateAnswer(id) => HttpResponse::ok(&app.update_answer(id, req.json()?).await?),

        Route::ListVersions(idea_id) => HttpResponse::ok(&app.list_versions(idea_id).await?),
        Route::CreateVersion => HttpResponse::created(&app.create_version(req.json()?).await?),
        Route::RestoreVersion {
            idea_id,
            version_id,
        } => HttpResponse::ok(&app.restore_version(idea_id, version_id).await?),

        Route::GenerateQuestions(idea_id) => {
            HttpResponse::ok(&app.generate_questions(idea_id).await?)
        }
        Route::SuggestQuestions(idea_id) => {
            HttpResponse::ok(&app.suggest_questions(idea_id).await?)
        }
        Route::QuestionFeedback => {
            HttpResponse::created(&app.record_feedback(req.json()?).await?)
        }

        Route::GetSettings(user_id) => HttpResponse::ok(&app.get_settings(user_id).await?),
        Route::UpdateSettings(user_id) => {
            HttpResponse::ok(&app.update_settings(user_id, req.json()?).await?)
        }

        Route::ListApiConfigs => HttpResponse::ok(&app.list_api_configs().await?),
        Route::SaveApiConfig => HttpResponse::created(&app.save_api_config(req.json()?).await?),
        Route::UpdateApiConfig(id) => {
            HttpResponse::ok(&app.update_api_config(id, req.json()?).await?)
        }
        Route::DeleteApiConfig(id) => {
            app.delete_api_config(id).await?;
            Ok(HttpResponse::no_content())
        }
        Route::TestConnection => {
            let ConnectionRequest { provider } = req.json()?;
            HttpResponse::ok(&app.test_connection(provider).await?)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::MemStorage;
    use serde_json::{json, Value};

    async fn app() -> App<MemStorage> {
        let app = App::new(MemStorage::new());
        app.seed_default_questions().await.unwrap();
        app
    }

    async fn call(app: &App<MemStorage>, method: &str, target: &str, body: Value) -> HttpResponse {
        let body = if body.is_null() {
            Vec::new()
        } else {
            body.to_string().into_bytes()
        };
        dispatch(app, HttpRequest::new(method, target, body)).await
    }

    #[test]
    fn test_resolve_routes() {
        assert_eq!(resolve("POST", "/api/register"), Ok(Route::Register));
        assert_eq!(resolve("GET", "/api/ideas/4/"), Ok(Route::GetIdea(4)));
        assert_eq!(
            resolve("POST", "/api/ideas/4/restore/9"),
            Ok(Route::RestoreVersion {
                idea_id: 4,
                version_id: 9
            })
        );
        assert_eq!(resolve("PATCH", "/api/ideas/4"), Err(RouteError::MethodNotAllowed));
        assert_eq!(resolve("GET", "/api/nope"), Err(RouteError::NoRoute));
        assert_eq!(
            resolve("GET", "/api/ideas/abc"),
            Err(RouteError::InvalidId("abc".to_string()))
        );
    }

    #[tokio::test]
    async fn test_idea_lifecycle_over_http() {
        let app = app().await;

        let user = call(
            &app,
            "POST",
            "/api/register",
            json!({"username": "ada", "password": "pw"}),
        )
        .await;
        assert_eq!(user.status, 201);
        let user_id = user.body_json()["id"].as_i64().unwrap();

        let created = call(
            &app,
            "POST",
            "/api/ideas",
            json!({"title": "X", "description": "Y", "userId": user_id}),
        )
        .await;
        assert_eq!(created.status, 201);
        let idea = created.body_json();
        assert_eq!(idea["status"], "draft");
        assert_eq!(idea["mediaUrls"], json!([]));
        let idea_id = idea["id"].as_i64().unwrap();

        let versions_path = format!("/api/ideas/{idea_id}/versions");
        let versions = call(&app, "GET", &versions_path, Value::Null).await.body_json();
        assert_eq!(versions.as_array().unwrap().len(), 1);
        let first_version = versions[0]["id"].as_i64().unwrap();
        assert_eq!(versions[0]["title"], "X");

        let saved = call(
            &app,
            "POST",
            "/api/answers",
            json!({"ideaId": idea_id, "questionId": 7, "text": "Nobody sells one under $30"}),
        )
        .await;
        assert_eq!(saved.status, 200);
        assert!(saved.body_json()["quality"].as_u64().is_some());

        let updated = call(
            &app,
            "PUT",
            &format!("/api/ideas/{idea_id}"),
            json!({"title": "X2", "status": "in_progress"}),
        )
        .await;
        assert_eq!(updated.status, 200);
        assert_eq!(updated.body_json()["status"], "in_progress");

        let versions = call(&app, "GET", &format!("/api/ideas/{idea_id}/versions"), Value::Null)
            .await
            .body_json();
        assert_eq!(versions.as_array().unwrap().len(), 2);
        assert_eq!(versions[0]["answersSnapshot"][0]["questionId"], 7);

        let restored = call(
            &app,
            "POST",
            &format!("/api/ideas/{idea_id}/restore/{first_version}"),
            Value::Null,
        )
        .await;
        assert_eq!(restored.status, 200);
        let restored = restored.body_json();
        assert_eq!(restored["idea"]["title"], "X");
        assert_eq!(restored["idea"]["description"], "Y");
        assert_eq!(restored["idea"]["status"], "in_progress");

        let answers = call(&app, "GET", &format!("/api/ideas/{idea_id}/answers"), Value::Null)
            .await
            .body_json();
        assert_eq!(answers[0]["questionId"], 7);
        assert_eq!(answers[0]["questionText"], "How is this different from existing solutions?");

        let deleted = call(&app, "DELETE", &format!("/api/ideas/{idea_id}"), Value::Null).await;
        assert_eq!(deleted.status, 204);
        let missing = call(&app, "GET", &format!("/api/ideas/{idea_id}"), Value::Null).await;
        assert_eq!(missing.status, 404);
        assert_eq!(missing.body_json()["error"]["code"], "NOT_FOUND");
    }

    #[tokio::test]
    async fn test_duplicate_username_is_conflict() {
        let app = app().await;
        let body = json!({"username": "ada", "password": "pw"});
        assert_eq!(call(&app, "POST", "/api/register", body.clone()).await.status, 201);

        let again = call(&app, "POST", "/api/register", body).await;
        assert_eq!(again.status, 409);
        assert_eq!(again.body_json()["error"]["code"], "CONFLICT");

        let bad_login = call(
            &app,
            "POST",
            "/api/login",
            json!({"username": "ada", "password": "nope"}),
        )
        .await;
        assert_eq!(bad_login.status, 401);
    }

    #[tokio::test]
    async fn test_client_errors() {
        let app = app().await;

        let missing_user = call(&app, "GET", "/api/ideas", Value::Null).await;
        assert_eq!(missing_user.status, 400);

        let bad_json = dispatch(&app, HttpRequest::new("POST", "/api/ideas", "{nope")).await;
        assert_eq!(bad_json.status, 400);
        assert_eq!(bad_json.body_json()["error"]["code"], "VALIDATION");

        let blank = call(&app, "POST", "/api/categories", json!({"name": "  "})).await;
        assert_eq!(blank.status, 400);

        let wrong_method = call(&app, "DELETE", "/api/questions", Value::Null).await;
        assert_eq!(wrong_method.status, 405);

        let unknown = call(&app, "GET", "/api/unknown", Value::Null).await;
        assert_eq!(unknown.status, 404);

        let feedback = call(
            &app,
            "POST",
            "/api/question-feedback",
            json!({"questionId": 999, "helpful": true}),
        )
        .await;
        assert_eq!(feedback.status, 404);
    }

    #[tokio::test]
    async fn test_feedback_and_generated_questions() {
        let app = app().await;
        let user = call(&app, "POST", "/api/register", json!({"username": "bo", "password": "pw"}))
            .await
            .body_json();
        let idea = call(
            &app,
            "POST",
            "/api/ideas",
            json!({
                "title": "Kettle",
                "description": "solar kettle for camping",
                "userId": user["id"],
            }),
        )
        .await
        .body_json();
        let idea_id = idea["id"].as_i64().unwrap();

        for helpful in [true, true, false, true] {
            let response = call(
                &app,
                "POST",
                "/api/question-feedback",
                json!({"questionId": 6, "userId": user["id"], "helpful": helpful}),
            )
            .await;
            assert_eq!(response.status, 201);
        }

        let questions = call(
            &app,
            "POST",
            &format!("/api/ideas/{idea_id}/generate-questions"),
            Value::Null,
        )
        .await
        .body_json();
        assert_eq!(questions.as_array().unwrap().len(), 5);
        assert_eq!(questions[0]["id"], 6);
        assert_eq!(questions[0]["effectiveness"], 4);

        let suggestions = call(
            &app,
            "POST",
            &format!("/api/ideas/{idea_id}/suggest-questions"),
            Value::Null,
        )
        .await
        .body_json();
        assert_eq!(suggestions.as_array().unwrap().len(), 5);
    }

    #[tokio::test]
    async fn test_api_configs_never_expose_keys() {
        let app = app().await;
        let saved = call(
            &app,
            "POST",
            "/api/api-configs",
            json!({"provider": "anthropic", "apiKey": "sk-ant-0123456789"}),
        )
        .await;
        assert_eq!(saved.status, 201);
        let body = saved.body_json();
        assert_eq!(body["maskedKey"], "sk-...6789");
        assert!(body.get("apiKey").is_none());

        let check = call(
            &app,
            "POST",
            "/api/test-ai-connection",
            json!({"provider": "anthropic"}),
        )
        .await;
        assert_eq!(check.status, 200);
        assert_eq!(check.body_json()["ok"], true);

        let id = body["id"].as_i64().unwrap();
        let removed = call(&app, "DELETE", &format!("/api/api-configs/{id}"), Value::Null).await;
        assert_eq!(removed.status, 204);
        let listed = call(&app, "GET", "/api/api-configs", Value::Null).await.body_json();
        assert!(listed.as_array().unwrap().is_empty());
    }
}

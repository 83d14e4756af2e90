//! The server module owns the API surface.  It runs builds through the server::controller module.

use actix_web::{
    body::BoxBody, error::ResponseError, middleware::DefaultHeaders, web, App, HttpRequest,
    HttpResponse, HttpServer, Responder,
};
use formschema::{reconstruct, render_schema, Control, Schema, SubmittedForm, SCHEMA_ROOT};
use http::{Method, StatusCode};
use serde_json::json;
use snafu::{OptionExt, ResultExt};
use std::fs;
use std::path::Path;

pub mod controller;
pub mod error;

use crate::model::Config;
use crate::workspace::Workspace;
use controller::{BuildOutput, BuildTools};
pub use error::{Error, Result};

/// Data every handler needs that doesn't come from the request itself.
pub struct SharedData {
    pub workspace: Workspace,
    pub tools: BuildTools,
    /// Needed for form-encoded submissions; without it those endpoints answer 404.
    pub schema: Option<OptionsSchema>,
}

/// The options schema the server was started with, parsed and as read.  The original text is
/// shipped in every build's flake.
#[derive(Debug, Clone)]
pub struct OptionsSchema {
    pub schema: Schema,
    pub document: String,
}

pub async fn serve(addr: &str, port: u16, shared: SharedData) -> Result<()> {
    info!(
        "Using build workspace '{}'",
        shared.workspace.path().display()
    );
    let shared_data = web::Data::new(shared);

    let http_server = HttpServer::new(move || {
        App::new()
            .app_data(shared_data.clone())
            .wrap(cors_headers())
            .configure(register_routes)
    })
    .bind((addr, port))
    .context(error::BindAddressSnafu {
        addr: format!("{}:{}", addr, port),
    })?;

    info!("Listening on http://{}:{}", addr, port);
    http_server.run().await.context(error::ServerStartSnafu)
}

/// Reads the options schema that form submissions are reconstructed against.
pub fn load_schema<P: AsRef<Path>>(path: P) -> Result<OptionsSchema> {
    let path = path.as_ref();
    let document = fs::read_to_string(path).context(error::ReadSchemaSnafu { path })?;
    let schema = document.parse().context(error::LoadSchemaSnafu { path })?;
    Ok(OptionsSchema { schema, document })
}

fn options_document(data: &SharedData) -> Option<&str> {
    data.schema.as_ref().map(|options| options.document.as_str())
}

/// The browser UI is served from another origin, so every response allows any.
pub fn cors_headers() -> DefaultHeaders {
    DefaultHeaders::new()
        .add(("Access-Control-Allow-Origin", "*"))
        .add(("Access-Control-Allow-Methods", "GET, POST, OPTIONS"))
        .add(("Access-Control-Allow-Headers", "Content-Type"))
}

pub fn register_routes(cfg: &mut web::ServiceConfig) {
    cfg.service(web::resource("/").route(web::get().to(health_check)))
        .service(web::resource("/api").route(web::get().to(health_check)))
        .service(
            web::scope("/nixosConfig")
                .service(
                    web::resource("")
                        .route(web::post().to(build_config))
                        .route(web::method(Method::OPTIONS).to(preflight)),
                )
                .service(
                    web::resource("/form")
                        .route(web::get().to(get_form))
                        .route(web::post().to(build_form))
                        .route(web::method(Method::OPTIONS).to(preflight)),
                ),
        )
        .service(
            web::resource("/builds/{build_id}/{file}").route(web::get().to(get_artifact)),
        );
}

async fn health_check() -> StatusResponse {
    StatusResponse(json!({ "status": "ok" }))
}

async fn preflight() -> HttpResponse {
    HttpResponse::NoContent().finish()
}

/// Builds a JSON configuration document.  The body is taken as a string and parsed here so a
/// malformed document gets our error format rather than actix's.
async fn build_config(body: String, data: web::Data<SharedData>) -> Result<BuildResponse> {
    let config: Config = serde_json::from_str(&body).context(error::ParseConfigSnafu)?;
    let output =
        controller::build(&data.workspace, &data.tools, options_document(&data), &config).await?;
    Ok(BuildResponse(output))
}

/// Builds a form submission, reconstructing the document against the loaded schema.
async fn build_form(
    form: web::Form<Vec<(String, String)>>,
    data: web::Data<SharedData>,
) -> Result<BuildResponse> {
    let options = data.schema.as_ref().context(error::NoSchemaSnafu)?;
    let submitted = SubmittedForm::from_pairs(form.into_inner());
    debug!("Reconstructing configuration from {} fields", submitted.len());
    let document = reconstruct(&options.schema, &submitted).context(error::ReconstructSnafu)?;
    let config: Config = serde_json::from_value(document).context(error::ParseConfigSnafu)?;
    let output = controller::build(
        &data.workspace,
        &data.tools,
        Some(options.document.as_str()),
        &config,
    )
    .await?;
    Ok(BuildResponse(output))
}

/// The blank form for the loaded schema.
async fn get_form(data: web::Data<SharedData>) -> Result<ControlResponse> {
    let options = data.schema.as_ref().context(error::NoSchemaSnafu)?;
    let form = render_schema(&options.schema, SCHEMA_ROOT, None).context(error::NoSchemaSnafu)?;
    Ok(ControlResponse(form))
}

async fn get_artifact(
    path: web::Path<(String, String)>,
    data: web::Data<SharedData>,
) -> Result<HttpResponse> {
    let (build_id, file) = path.into_inner();
    let bytes = controller::read_artifact(&data.workspace, &build_id, &file).await?;
    Ok(HttpResponse::Ok()
        .content_type("application/octet-stream")
        .insert_header((
            "Content-Disposition",
            format!("attachment; filename=\"{}\"", file),
        ))
        .body(bytes))
}

// =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=

impl ResponseError for error::Error {
    /// Maps our error types to the HTTP error code they should return.
    fn status_code(&self) -> StatusCode {
        use error::Error::*;
        match self {
            // 400 Bad Request
            ParseConfig { .. } => StatusCode::BAD_REQUEST,
            EmptyHostname => StatusCode::BAD_REQUEST,
            InvalidHostname { .. } => StatusCode::BAD_REQUEST,
            NoAuthorizedKeys => StatusCode::BAD_REQUEST,
            EmptyAuthorizedKey => StatusCode::BAD_REQUEST,
            Reconstruct { .. } => StatusCode::BAD_REQUEST,

            // 404 Not Found
            NoSchema => StatusCode::NOT_FOUND,
            ArtifactNotFound { .. } => StatusCode::NOT_FOUND,

            // 500 Internal Server Error
            BindAddress { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            ServerStart { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            CreateWorkspace { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            ReadSchema { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            LoadSchema { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            EmptyTool => StatusCode::INTERNAL_SERVER_ERROR,
            CreateDir { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            WriteFile { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            ReadFile { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            ListOutput { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            ListHosts { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            SerializeConfig { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            SerializeHostnames { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            CreateArchive { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            PublishTask { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            CommandStart { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            CommandStdin { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            CommandInput { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            CommandWait { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            CommandFailure { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            ResponseSerialization { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        let status_code = self.status_code();
        if status_code.is_server_error() {
            error!("{}", self);
        } else {
            debug!("Rejected request: {}", self);
        }
        let body = json!({ "status": "error", "message": self.to_string() });
        HttpResponse::build(status_code)
            .content_type("application/json")
            .body(body.to_string())
    }
}

/// Helper macro for implementing the actix-web Responder trait for a type.
/// $for: the type for which we implement Responder.
/// $self: just pass "self"  (macro hygiene requires this)
/// $serialize_expr: the thing to serialize for a response; this is just "self" again if $for
///    implements Serialize, or is "self.0" for a newtype over something implementing Serialize
macro_rules! impl_responder_for {
    ($for:ident, $self:ident, $serialize_expr:expr) => (
        impl Responder for $for {
            type Body = BoxBody;
            fn respond_to($self, _req: &HttpRequest) -> HttpResponse {
                let body = match serde_json::to_string(&$serialize_expr) {
                    Ok(s) => s,
                    Err(e) => return actix_web::Error::from(Error::ResponseSerialization { source: e }).into(),
                };
                HttpResponse::Ok()
                    .content_type("application/json")
                    .body(body)
            }
        }
    )
}

/// This lets us respond from our handler methods with a plain status object.
struct StatusResponse(serde_json::Value);
impl_responder_for!(StatusResponse, self, self.0);

/// This lets us respond from our handler methods with a finished build (or Result<build>).
struct BuildResponse(BuildOutput);
impl_responder_for!(BuildResponse, self, self.0);

/// This lets us respond from our handler methods with a rendered control tree.
struct ControlResponse(Control);
impl_responder_for!(ControlResponse, self, self.0);

use anyhow::Result;
use axum::{
    Router,
    extract::State,
    extract::ws::{Message, WebSocket, WebSocketUpgrade},
    response::IntoResponse,
    routing::get,
};
use std::{net::SocketAddr, path::PathBuf};
use tokio::sync::broadcast;
use tower_http::services::ServeDir;
use tracing::{error, info};

/// Configuration for the development server
#[derive(Debug, Clone)]
pub struct DevServerConfig {
    /// Address to bind to, e.g. `127.0.0.1:8085`
    pub addr: String,
    /// Generated output directory
    pub output_dir: PathBuf,
    /// URL path prefix the site lives under; empty serves at the root
    pub path_prefix: String,
    /// Extra URL paths served from inside the output directory, e.g.
    /// `("/static", "static")` for a synced static mapping
    pub static_routes: Vec<(String, PathBuf)>,
}

impl Default for DevServerConfig {
    fn default() -> Self {
        Self {
            addr: "127.0.0.1:8085".to_string(),
            output_dir: PathBuf::from("./out"),
            path_prefix: String::new(),
            static_routes: vec![],
        }
    }
}

/// Serves the built output tree with live-reload signalling.
///
/// The server only ever reads files from disk; rebuilds happen elsewhere and
/// publish on the reload channel, which connected websocket clients receive
/// as a `reload` message. Because the build pipeline renames complete files
/// into place, any file opened here is a whole old or new version.
pub struct DevServer {
    config: DevServerConfig,
    reload_tx: broadcast::Sender<String>,
}

impl DevServer {
    pub fn new(config: DevServerConfig, reload_tx: broadcast::Sender<String>) -> Self {
        Self { config, reload_tx }
    }

    /// Run until ctrl-c, draining in-flight requests on shutdown. Fails fast
    /// when the output directory is missing or the address can't be bound.
    pub async fn run(self) -> Result<()> {
        if !self.config.output_dir.exists() {
            return Err(anyhow::anyhow!(
                "Output directory does not exist: {}",
                self.config.output_dir.display()
            ));
        }

        let addr: SocketAddr = self.config.addr.parse()?;
        let app = self.router();

        info!(%addr, prefix = %self.config.path_prefix, "serving site");
        info!("live reload available at ws://{}/__livereload", addr);

        let listener = tokio::net::TcpListener::bind(addr).await?;
        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal())
            .await?;

        Ok(())
    }

    /// Routes: the prefix subtree, each static mapping, and the reload
    /// websocket. Everything else is a 404.
    pub fn router(&self) -> Router {
        let state = AppState {
            reload_tx: self.reload_tx.clone(),
        };

        let mut app = Router::new()
            .route("/__livereload", get(websocket_handler))
            .with_state(state);

        for (url_path, rel) in &self.config.static_routes {
            let url_path = format!("/{}", url_path.trim_matches('/'));
            if url_path == "/" {
                continue;
            }
            app = app.nest_service(&url_path, ServeDir::new(self.config.output_dir.join(rel)));
        }

        let prefix = self.config.path_prefix.trim_matches('/');
        if prefix.is_empty() {
            app.fallback_service(ServeDir::new(&self.config.output_dir))
        } else {
            app.nest_service(
                &format!("/{}", prefix),
                ServeDir::new(self.config.output_dir.join(prefix)),
            )
        }
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(%e, "failed to listen for shutdown signal");
    }
    info!("shutting down");
}

#[derive(Clone)]
struct AppState {
    reload_tx: broadcast::Sender<String>,
}

async fn websocket_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
) -> impl IntoResponse {
    ws.on_upgrade(|socket| websocket_connection(socket, state.reload_tx))
}

async fn websocket_connection(mut socket: WebSocket, reload_tx: broadcast::Sender<String>) {
    let mut rx = reload_tx.subscribe();

    // Send initial connection confirmation
    if socket
        .send(Message::Text("connected".to_string().into()))
        .await
        .is_err()
    {
        return;
    }

    loop {
        tokio::select! {
            msg = rx.recv() => {
                match msg {
                    Ok(reload_msg) => {
                        if socket.send(Message::Text(reload_msg.into())).await.is_err() {
                            break;
                        }
                    }
                    Err(_) => break,
                }
            }
            msg = socket.recv() => {
                if msg.is_none() {
                    break;
                }
            }
        }
    }
}

/// Inject the live reload script into HTML content
pub fn inject_livereload_script(html: &str, addr: &str) -> String {
    let script = format!(
        r#"
<script>
(function() {{
    const socket = new WebSocket('ws://{}/__livereload');
    socket.onmessage = function(event) {{
        if (event.data === 'reload') {{
            location.reload();
        }}
    }};
    socket.onclose = function() {{
        console.log('Live reload disconnected');
    }};
}})();
</script>
"#,
        addr
    );

    // Try to inject before closing body tag, or at the end if not found
    if let Some(pos) = html.rfind("</body>") {
        let mut result = String::with_capacity(html.len() + script.len());
        result.push_str(&html[..pos]);
        result.push_str(&script);
        result.push_str(&html[pos..]);
        result
    } else {
        format!("{}{}", html, script)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use std::fs;
    use tower::util::ServiceExt;

    fn server(dir: &std::path::Path) -> DevServer {
        fs::create_dir_all(dir.join("galore")).unwrap();
        fs::write(dir.join("galore/index.html"), "<html>home</html>").unwrap();
        fs::create_dir_all(dir.join("static")).unwrap();
        fs::write(dir.join("static/app.css"), "body {}").unwrap();

        let (reload_tx, _) = broadcast::channel(16);
        DevServer::new(
            DevServerConfig {
                addr: "127.0.0.1:0".to_string(),
                output_dir: dir.to_path_buf(),
                path_prefix: "/galore".to_string(),
                static_routes: vec![("/static/".to_string(), PathBuf::from("static"))],
            },
            reload_tx,
        )
    }

    #[tokio::test]
    async fn serves_files_beneath_the_prefix() {
        let dir = tempfile::tempdir().unwrap();
        let app = server(dir.path()).router();

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/galore/index.html")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn serves_static_mappings() {
        let dir = tempfile::tempdir().unwrap();
        let app = server(dir.path()).router();

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/static/app.css")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn paths_outside_the_prefix_are_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let app = server(dir.path()).router();

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/elsewhere/index.html")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn reload_script_lands_before_closing_body() {
        let html = "<html><body>hi</body></html>";
        let injected = inject_livereload_script(html, "127.0.0.1:8085");
        let body_close = injected.find("</body>").unwrap();
        let script = injected.find("<script>").unwrap();
        assert!(script < body_close);
    }
}

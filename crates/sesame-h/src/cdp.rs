use chromiumoxide::{Browser, BrowserConfig, Page};
use futures::StreamExt;
use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::task::JoinHandle;

/// Owns the launched (or attached) browser and its handler loop.
pub struct CdpClient {
    pub browser: Browser,
    pub handler_task: JoinHandle<()>,
    pub page: Page,
    user_data_dir: Option<PathBuf>,
    cleanup_user_data_dir: bool,
}

impl CdpClient {
    pub async fn launch(visible: bool) -> Result<Self, Box<dyn std::error::Error + Send + Sync>> {
        let mut config_builder = BrowserConfig::builder();
        config_builder = config_builder.no_sandbox(); // Often needed in docker/CI/restricted envs
        let (user_data_dir, cleanup_user_data_dir) = resolve_user_data_dir()?;
        config_builder = config_builder.user_data_dir(&user_data_dir);

        if visible {
            tracing::info!("Launching browser in visible mode");
            config_builder = config_builder.with_head();
        } else {
            tracing::info!("Launching browser in headless mode");
        }

        // Support custom Chrome path via CHROME_BIN environment variable
        if let Ok(chrome_bin) = std::env::var("CHROME_BIN") {
            tracing::info!("Using custom Chrome binary: {}", chrome_bin);
            config_builder = config_builder.chrome_executable(chrome_bin);
        }

        let (browser, handler) = Browser::launch(
            config_builder
                .build()
                .map_err(|e| format!("Failed to build browser config: {}", e))?,
        )
        .await
        .map_err(|e| format!("Failed to launch browser: {}", e))?;

        let handler_task = spawn_handler(handler);

        let page = browser
            .new_page("about:blank")
            .await
            .map_err(|e| format!("Failed to create page: {}", e))?;

        Ok(Self {
            browser,
            handler_task,
            page,
            user_data_dir: Some(user_data_dir),
            cleanup_user_data_dir,
        })
    }

    /// Attach to an already-running, already-authenticated browser via
    /// its DevTools websocket URL and adopt its first page.
    pub async fn connect(ws_url: &str) -> Result<Self, Box<dyn std::error::Error + Send + Sync>> {
        tracing::info!("Connecting to existing browser at {}", ws_url);
        let (browser, handler) = Browser::connect(ws_url)
            .await
            .map_err(|e| format!("Failed to connect to browser: {}", e))?;
        let handler_task = spawn_handler(handler);

        let pages = browser
            .pages()
            .await
            .map_err(|e| format!("Failed to list pages: {}", e))?;
        let page = match pages.into_iter().next() {
            Some(p) => p,
            None => browser
                .new_page("about:blank")
                .await
                .map_err(|e| format!("Failed to create page: {}", e))?,
        };

        Ok(Self {
            browser,
            handler_task,
            page,
            user_data_dir: None,
            cleanup_user_data_dir: false,
        })
    }

    pub async fn close(mut self) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        self.browser
            .close()
            .await
            .map_err(|e| format!("Error closing browser: {}", e))?;
        self.handler_task
            .await
            .map_err(|e| format!("Error awaiting handler: {}", e))?;

        if self.cleanup_user_data_dir {
            if let Some(dir) = &self.user_data_dir {
                if let Err(e) = std::fs::remove_dir_all(dir) {
                    tracing::debug!("Failed to clean up user-data-dir {}: {}", dir.display(), e);
                }
            }
        }

        Ok(())
    }
}

fn spawn_handler(mut handler: chromiumoxide::Handler) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(h) = handler.next().await {
            if let Err(e) = h {
                tracing::error!("Browser handler error (ignoring): {}", e);
                continue;
            }
        }
        tracing::info!("Browser handler task ended");
    })
}

fn resolve_user_data_dir() -> Result<(PathBuf, bool), Box<dyn std::error::Error + Send + Sync>> {
    if let Ok(dir) = std::env::var("SESAME_USER_DATA_DIR") {
        let path = PathBuf::from(dir);
        std::fs::create_dir_all(&path)?;
        tracing::info!(
            "Using user data dir from SESAME_USER_DATA_DIR: {}",
            path.display()
        );
        return Ok((path, false));
    }

    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_err(|e| format!("System clock error: {}", e))?
        .as_nanos();
    let unique = format!("sesame-chromium-profile-{}-{}", std::process::id(), nanos);
    let path = std::env::temp_dir().join(unique);
    std::fs::create_dir_all(&path)?;
    tracing::info!("Using isolated user data dir: {}", path.display());
    Ok((path, true))
}

use anyhow::Context;
use folio_server::state::AppState;
use std::path::Path;

pub fn run(root: &Path, port: u16) -> anyhow::Result<()> {
    let state = AppState::open(root).context("failed to open folio project")?;

    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(async move {
        let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{port}")).await?;
        let actual_port = listener.local_addr()?.port();
        println!("folio server → http://localhost:{actual_port}  (PID {})", std::process::id());
        folio_server::serve_on(state, listener).await
    })
}

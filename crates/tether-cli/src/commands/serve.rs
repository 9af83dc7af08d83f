use std::sync::Arc;

use anyhow::Result;

use tether::server::ToolServer;
use tether::toolkit::DemoToolkit;
use tether::transport::StdioTransport;

/// Run a tool provider on stdin/stdout until the driver hangs up.
pub async fn execute() -> Result<()> {
    let server = ToolServer::new()
        .with_name("tether-demo")
        .with_toolkit(Arc::new(DemoToolkit::new()));
    let mut transport = StdioTransport::new();
    server.run(&mut transport).await?;
    Ok(())
}

// Demo tool provider speaking MCP over stdio. Used by the integration tests and for local trials.

use anyhow::Result;
use clap::Parser;
use toolgate_mcp::{codec::Framing, tools::demo_tools, McpServer};

#[derive(Parser, Debug)]
#[command(name = "toolgate-echo")]
#[command(about = "Demo MCP tool provider (echo, add, sleep, fail)", long_about = None)]
struct Args {
    /// Frame messages with Content-Length headers instead of newlines
    #[arg(long)]
    content_length: bool,

    /// Answer tools/list in pages of this many tools
    #[arg(long)]
    page_size: Option<usize>,
}

#[tokio::main]
async fn main() -> Result<()> {
    // stdout carries the protocol; logs go to stderr
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "toolgate=info".into()),
        )
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();

    let args = Args::parse();

    let mut server = McpServer::new("toolgate-echo", env!("CARGO_PKG_VERSION"), demo_tools());
    if let Some(page_size) = args.page_size {
        server = server.with_page_size(page_size);
    }

    let framing = if args.content_length {
        Framing::ContentLength
    } else {
        Framing::Lines
    };
    server
        .serve(tokio::io::stdin(), tokio::io::stdout(), framing)
        .await?;
    Ok(())
}

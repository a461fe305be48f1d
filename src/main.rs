//! `keyward` -- credential lifecycle service.
//!
//! - `keyward serve` -- run the HTTP admin API and session endpoints.
//! - `keyward secret` -- print a fresh random secret and exit.

use actix_web::{web, App, HttpServer};
use anyhow::Context;
use clap::{Parser, Subcommand};
use keyward::config::ApiKeyTransport;
use keyward::server::{config_routes, ADMIN_SCOPE};
use keyward::util::{env_bind_addr, env_string, init_tracing};
use keyward::{generate_prefixed, ApiKeyManager, CsrfManager};
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "keyward", about = "API key and CSRF token lifecycle service", version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP server.
    Serve {
        /// Address to bind, e.g. 0.0.0.0:8089.
        #[arg(long, env = "BIND_ADDR")]
        bind: Option<String>,

        /// Skip creating the bootstrap admin key.
        #[arg(long)]
        no_bootstrap: bool,
    },

    /// Print a random URL-safe secret.
    Secret {
        /// Random bytes before encoding.
        #[arg(long, default_value = "32")]
        bytes: usize,

        /// String prepended to the encoded secret.
        #[arg(long, default_value = "")]
        prefix: String,
    },
}

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Commands::Serve { bind, no_bootstrap } => serve(bind, no_bootstrap).await,
        Commands::Secret { bytes, prefix } => {
            let secret = generate_prefixed(&prefix, bytes).context("generating secret")?;
            println!("{secret}");
            Ok(())
        }
    }
}

async fn serve(bind: Option<String>, no_bootstrap: bool) -> anyhow::Result<()> {
    init_tracing();

    let keys = web::Data::new(ApiKeyManager::from_env().context("API key configuration")?);
    let csrf = web::Data::new(CsrfManager::from_env().context("CSRF configuration")?);
    let transport = web::Data::new(ApiKeyTransport::from_env());

    if no_bootstrap {
        warn!("bootstrap admin key disabled; the admin API is unreachable until a key exists");
    } else {
        let name = env_string("KEYWARD_BOOTSTRAP_NAME").unwrap_or_else(|| "bootstrap".into());
        // Entropy failure here halts startup.
        let admin = keys
            .generate_key(&name, [ADMIN_SCOPE], "keyward")
            .context("creating bootstrap admin key")?;
        info!(key_id = %admin.key.id, "bootstrap admin key created");
        println!("bootstrap admin key ({}): {}", admin.key.id, admin.token);
    }

    let bind = bind.unwrap_or_else(env_bind_addr);
    info!("Starting server on {}", bind);

    let server = {
        let keys = keys.clone();
        let csrf = csrf.clone();
        HttpServer::new(move || {
            App::new()
                .app_data(keys.clone())
                .app_data(csrf.clone())
                .app_data(transport.clone())
                .configure(config_routes)
        })
        .bind(&bind)
        .with_context(|| format!("binding {bind}"))?
        .run()
    };
    server.await.context("server error")?;

    keys.shutdown().await;
    csrf.shutdown().await;
    info!("Shutdown complete");
    Ok(())
}

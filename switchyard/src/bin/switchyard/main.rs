/*
 *     Copyright 2025 The Switchyard Authors
 *
 * Licensed under the Apache License, Version 2.0 (the "License");
 * you may not use this file except in compliance with the License.
 * You may obtain a copy of the License at
 *
 *      http://www.apache.org/licenses/LICENSE-2.0
 *
 * Unless required by applicable law or agreed to in writing, software
 * distributed under the License is distributed on an "AS IS" BASIS,
 * WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
 * See the License for the specific language governing permissions and
 * limitations under the License.
 */

use clap::Parser;
use reqwest::{Method, Request};
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use switchyard::header::header_vec_to_headermap;
use switchyard::tracing::init_tracing;
use switchyard_config::{
    gateway::{self, Config},
    CARGO_PKG_VERSION, GIT_HASH,
};
use switchyard_core::{Error, Result};
use switchyard_pool::{ClientCache, Dispatcher};
use tracing::{error, info, Level};
use url::Url;

#[derive(Debug, Parser)]
#[command(
    name = gateway::NAME,
    author,
    version,
    about = "switchyard sends a request to an upstream through the pooled upstream clients",
    long_about = "A command line of the switchyard gateway that sends one request of an account to an upstream, \
    selecting the pooled upstream client by the account, the proxy and the account concurrency."
)]
struct Args {
    #[arg(help = "Specify the URL of the upstream request")]
    url: Url,

    #[arg(
        short = 'X',
        long = "method",
        default_value = "GET",
        help = "Specify the method of the upstream request"
    )]
    method: Method,

    #[arg(
        short = 'H',
        long = "header",
        required = false,
        help = "Specify the header of the upstream request, e.g. --header='Content-Type: application/json' --header='Accept: application/json'"
    )]
    header: Option<Vec<String>>,

    #[arg(
        short = 'd',
        long = "data",
        required = false,
        help = "Specify the body of the upstream request"
    )]
    data: Option<String>,

    #[arg(
        long = "proxy",
        default_value = "",
        help = "Specify the proxy url of the account, e.g. http://10.0.0.1:3128 or socks5://10.0.0.1:1080"
    )]
    proxy: String,

    #[arg(
        long = "account-id",
        default_value_t = 0,
        allow_negative_numbers = true,
        help = "Specify the id of the upstream account"
    )]
    account_id: i64,

    #[arg(
        long = "concurrency",
        default_value_t = 0,
        help = "Specify the concurrency limit of the upstream account, 0 uses the gateway limits"
    )]
    concurrency: usize,

    #[arg(
        short = 'c',
        long = "config",
        default_value_os_t = gateway::default_gateway_config_path(),
        help = "Specify config file to use"
    )]
    config: PathBuf,

    #[arg(
        short = 'l',
        long,
        default_value = "info",
        help = "Specify the logging level [trace, debug, info, warn, error]"
    )]
    log_level: Level,

    #[arg(
        long,
        default_value_os_t = gateway::default_gateway_log_dir(),
        help = "Specify the log directory"
    )]
    log_dir: PathBuf,

    #[arg(
        long,
        default_value_t = 6,
        help = "Specify the max number of log files"
    )]
    log_max_files: usize,

    #[arg(
        long = "verbose",
        default_value_t = false,
        help = "Specify whether to print log"
    )]
    verbose: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Parse command line arguments.
    let args = Args::parse();

    // Initialize tracing.
    let _guards = init_tracing(
        gateway::NAME,
        &args.log_dir,
        args.log_level,
        args.log_max_files,
        args.verbose,
    )?;

    info!(
        "{} version: {}, git hash: {}",
        gateway::NAME,
        CARGO_PKG_VERSION,
        GIT_HASH.unwrap_or("unknown")
    );

    // Load config, the defaults apply when the config file does not exist.
    let config = match Config::load(&args.config).await {
        Ok(config) => config,
        Err(Error::IO(err)) if err.kind() == std::io::ErrorKind::NotFound => {
            info!(
                "config {} not found, using default config",
                args.config.display()
            );
            Config::default()
        }
        Err(err) => {
            error!("load config {} failed: {}", args.config.display(), err);
            return Err(err.into());
        }
    };

    info!(
        "upstream connection pool isolation: {}, max upstream clients: {}",
        config.gateway.connection_pool_isolation, config.gateway.max_upstream_clients
    );

    let dispatcher = Dispatcher::new(Arc::new(ClientCache::builder(config.gateway).build()));
    let result = run(&dispatcher, args).await;
    dispatcher.cache().clear().await;

    if let Err(err) = result {
        error!("request failed: {}", err);
        return Err(err.into());
    }

    Ok(())
}

/// run sends the request and prints the response.
async fn run(dispatcher: &Dispatcher, args: Args) -> Result<()> {
    let mut request = Request::new(args.method, args.url);
    *request.headers_mut() = header_vec_to_headermap(args.header.unwrap_or_default())?;
    if let Some(data) = args.data {
        *request.body_mut() = Some(data.into());
    }

    let response = dispatcher
        .execute(request, &args.proxy, args.account_id, args.concurrency)
        .await?;

    let version = response.version();
    let status = response.status();
    let headers = response.headers().clone();
    let body = response.bytes().await?;

    let mut stdout = std::io::stdout().lock();
    writeln!(stdout, "{:?} {}", version, status)?;
    for (name, value) in headers.iter() {
        writeln!(
            stdout,
            "{}: {}",
            name,
            String::from_utf8_lossy(value.as_bytes())
        )?;
    }
    writeln!(stdout)?;
    stdout.write_all(&body)?;
    stdout.flush()?;
    Ok(())
}

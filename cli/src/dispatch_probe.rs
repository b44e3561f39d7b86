use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::Parser;
use http::Method;
use lib_dispatch::connections::cache_redis::RedisStore;
use lib_dispatch::loggers::setup_logging;
use lib_dispatch::retrieve::ReqwestTransport;
use lib_dispatch::{Dispatcher, Priority, RequestConfig, SessionGrant, Settings, resolve_settings};
use serde_json::Value;

/// Sends one request through the dispatcher and prints the outcome as JSON.
#[derive(Parser, Debug)]
#[command(name = "dispatch_probe", version)]
struct ProbeArgs {
    #[command(flatten)]
    settings: Settings,

    /// HTTP verb.
    #[arg(long, default_value = "GET")]
    method: String,

    /// Request path (joined to --base-url) or absolute URL.
    path: String,

    /// JSON data: query params for GET/DELETE, body otherwise.
    #[arg(long)]
    data: Option<String>,

    /// File to send as multipart upload instead of JSON.
    #[arg(long)]
    upload: Option<PathBuf>,

    /// Form field name of the uploaded file.
    #[arg(long, default_value = "file")]
    field: String,

    /// Bearer token to install before sending.
    #[arg(long, env = "DISPATCH_TOKEN", hide_env_values = true)]
    token: Option<String>,

    /// Sign the request.
    #[arg(long)]
    sign: bool,

    /// Encrypt the JSON payload.
    #[arg(long)]
    encrypt: bool,

    /// Cache the response for this many milliseconds (GET only).
    #[arg(long)]
    cache_ms: Option<u64>,

    /// Queue priority (1 low, 2 medium, 3 high).
    #[arg(long, default_value_t = 2)]
    priority: u8,
}

#[tokio::main]
async fn main() -> Result<()> {
    // A missing .env is the normal case.
    let _ = dotenvy::dotenv();
    let args = ProbeArgs::parse();
    let settings = resolve_settings(args.settings.clone())?;

    let log_dir = settings.log_dir.clone().unwrap_or_else(|| PathBuf::from("./logs"));
    let log_level = settings.log_level.clone().unwrap_or_else(|| "info".to_string());
    setup_logging("dispatch_probe", &log_dir, &log_level)?;

    let transport = ReqwestTransport::new(settings.base_url.as_deref())?;
    let mut builder = Dispatcher::builder(Arc::new(transport)).settings(settings.clone());
    if let Some(redis_url) = &settings.redis_url {
        builder = builder.store(Arc::new(RedisStore::connect(redis_url).await?));
    }
    let dispatcher = builder.build()?;

    if let Some(token) = args.token.clone() {
        dispatcher.login(SessionGrant {
            token,
            signing_secret: None,
            encryption_key: None,
        })
        .await?;
    }

    let method = Method::from_bytes(args.method.to_uppercase().as_bytes())
        .with_context(|| format!("invalid HTTP method {}", args.method))?;
    let data: Option<Value> = args
        .data
        .as_deref()
        .map(serde_json::from_str)
        .transpose()
        .context("--data must be valid JSON")?;

    let result = match &args.upload {
        Some(file) => {
            let fields: BTreeMap<String, String> = match &data {
                Some(Value::Object(map)) => map
                    .iter()
                    .map(|(k, v)| {
                        let text = v.as_str().map(str::to_string).unwrap_or_else(|| v.to_string());
                        (k.clone(), text)
                    })
                    .collect(),
                Some(_) => bail!("--data must be a JSON object when uploading"),
                None => BTreeMap::new(),
            };
            let opts = lib_dispatch::RequestOptions {
                priority: Priority(args.priority),
                sign: args.sign,
                ..Default::default()
            };
            dispatcher
                .upload(&args.path, file.clone(), &args.field, fields, opts)
                .await
        }
        None => {
            let mut config = RequestConfig::new(method, args.path.clone())
                .priority(Priority(args.priority))
                .signed(args.sign)
                .encrypted(args.encrypt);
            if let Some(data) = data {
                config = config.data(data);
            }
            if let Some(ms) = args.cache_ms {
                config = config.cached(Duration::from_millis(ms));
            }
            dispatcher.request(config).await
        }
    };

    match result {
        Ok(response) => {
            log::info!("HTTP {} (from cache: {})", response.status, response.from_cache);
            println!("{}", serde_json::to_string_pretty(&response.body)?);
            Ok(())
        }
        Err(err) => {
            log::error!("Request failed: {}", err);
            eprintln!("{}", serde_json::to_string_pretty(&err.to_body())?);
            std::process::exit(1);
        }
    }
}

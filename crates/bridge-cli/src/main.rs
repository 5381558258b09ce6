mod commands;

use anyhow::Context as _;
use clap::{Parser, Subcommand, ValueEnum};
use mcpbridge_openapi_tools::{BridgeConfig, OpenApiDocument, ToolBridge};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "mcpbridge")]
#[command(about = "Expose an OpenAPI document as MCP tools")]
#[command(version)]
struct Args {
    /// OpenAPI 3.0 document (JSON or YAML)
    #[arg(long, env = "MCPBRIDGE_SPEC")]
    spec: PathBuf,

    /// Bridge configuration (JSON or YAML)
    #[arg(long, env = "MCPBRIDGE_CONFIG")]
    config: Option<PathBuf>,

    /// Override the upstream base URL
    #[arg(long, env = "MCPBRIDGE_BASE_URL")]
    base_url: Option<String>,

    /// Log filter, e.g. `info` or `mcpbridge_openapi_tools=debug`
    #[arg(long, env = "RUST_LOG", default_value = "warn")]
    log_level: String,

    #[arg(long, value_enum, env = "MCPBRIDGE_LOG_FORMAT", default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Command,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List the generated tools
    List {
        /// Print the full tool definitions as JSON
        #[arg(long)]
        json: bool,
    },
    /// Call a tool and print its result
    Call {
        tool: String,
        /// Arguments as a JSON object
        #[arg(long, default_value = "{}")]
        args: String,
        /// Incoming header for passthrough (`Name: value`), repeatable
        #[arg(short = 'H', long = "header", value_parser = commands::parse_header)]
        headers: Vec<(String, String)>,
        /// Print the upstream request instead of sending it
        #[arg(long)]
        dry_run: bool,
    },
    /// Report how the document converts: tool count, contract hash, skipped operations
    Check {
        /// Exit non-zero when any operation was skipped
        #[arg(long)]
        strict: bool,
    },
}

fn init_tracing(level: &str, format: LogFormat) -> anyhow::Result<()> {
    let filter = EnvFilter::try_new(level).with_context(|| format!("invalid log filter '{level}'"))?;
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    match format {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
    Ok(())
}

fn load_config(path: Option<&Path>, base_url: Option<String>) -> anyhow::Result<BridgeConfig> {
    let mut config = match path {
        Some(p) => BridgeConfig::load(p).with_context(|| format!("load config {}", p.display()))?,
        None => BridgeConfig::default(),
    };
    if base_url.is_some() {
        config.base_url = base_url;
    }
    Ok(config)
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let args = Args::parse();
    init_tracing(&args.log_level, args.log_format)?;

    let config = load_config(args.config.as_deref(), args.base_url)?;
    let document = OpenApiDocument::load(&args.spec)
        .with_context(|| format!("load document {}", args.spec.display()))?;
    let bridge = ToolBridge::with_reqwest(&document, config).context("build tool bridge")?;
    tracing::debug!(
        spec = %args.spec.display(),
        fingerprint = document.fingerprint(),
        "Bridge ready"
    );

    let mut out = std::io::stdout().lock();
    match args.command {
        Command::List { json } => commands::list(&bridge, json, &mut out),
        Command::Call {
            tool,
            args,
            headers,
            dry_run,
        } => {
            let arguments = commands::parse_arguments(&args)?;
            let ctx = commands::context_from_headers(&headers)?;
            if dry_run {
                commands::dry_run(&bridge, &tool, &arguments, &ctx, &mut out)
            } else {
                commands::call(&bridge, &tool, arguments, &ctx, &mut out).await
            }
        }
        Command::Check { strict } => commands::check(&bridge, &document, strict, &mut out),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_call_with_headers() {
        let args = Args::try_parse_from([
            "mcpbridge",
            "--spec",
            "api.yaml",
            "--base-url",
            "http://localhost:8080",
            "call",
            "get_pets_id",
            "--args",
            r#"{"id": 1}"#,
            "-H",
            "Authorization: Bearer x",
            "--dry-run",
        ])
        .expect("parses");
        assert_eq!(args.spec, PathBuf::from("api.yaml"));
        assert_eq!(args.base_url.as_deref(), Some("http://localhost:8080"));
        match args.command {
            Command::Call {
                tool,
                headers,
                dry_run,
                ..
            } => {
                assert_eq!(tool, "get_pets_id");
                assert_eq!(
                    headers,
                    vec![("Authorization".to_string(), "Bearer x".to_string())]
                );
                assert!(dry_run);
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn rejects_malformed_headers() {
        let err = Args::try_parse_from([
            "mcpbridge", "--spec", "api.yaml", "call", "t", "-H", "no-colon",
        ])
        .unwrap_err();
        assert!(err.to_string().contains("Name: value"), "{err}");
    }

    #[test]
    fn base_url_flag_overrides_config_file() {
        let mut file = tempfile::NamedTempFile::new().expect("temp file");
        std::io::Write::write_all(
            &mut file,
            b"baseUrl: http://from-config.test\ntimeoutSecs: 5\n",
        )
        .expect("write config");

        let config = load_config(Some(file.path()), None).expect("loads");
        assert_eq!(config.base_url.as_deref(), Some("http://from-config.test"));
        assert_eq!(config.timeout_secs, 5);

        let config = load_config(Some(file.path()), Some("http://flag.test".to_string()))
            .expect("loads");
        assert_eq!(config.base_url.as_deref(), Some("http://flag.test"));
    }

    #[test]
    fn unknown_config_keys_fail() {
        let mut file = tempfile::NamedTempFile::new().expect("temp file");
        std::io::Write::write_all(&mut file, b"baseURL: http://typo.test\n").expect("write");
        assert!(load_config(Some(file.path()), None).is_err());
    }
}

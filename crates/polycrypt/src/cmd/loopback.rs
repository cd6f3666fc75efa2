use std::sync::Arc;

use polycrypt::loopback::LoopbackBackend;
use polycrypt_channel::UnixBackendListener;
use polycrypt_schema::{SchemaConfig, SchemaRegistry};

use crate::cmd::{runtime, LoopbackArgs};
use crate::exit::{channel_error, CliError, CliResult, DATA_INVALID, SUCCESS};

pub fn run(args: LoopbackArgs) -> CliResult<i32> {
    let schema = load_schema(&args)?;
    runtime()?.block_on(serve(args, schema))
}

async fn serve(args: LoopbackArgs, schema: Option<Arc<SchemaRegistry>>) -> CliResult<i32> {
    let listener =
        UnixBackendListener::bind(&args.path).map_err(|err| channel_error("bind failed", err))?;
    tracing::info!(origin = %listener.origin(), "loopback backend ready");

    loop {
        let (channel, inbound) = tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("interrupted; shutting down");
                break;
            }
            accepted = listener.accept() => {
                accepted.map_err(|err| channel_error("accept failed", err))?
            }
        };

        let mut backend = LoopbackBackend::new(channel);
        if let Some(schema) = &schema {
            backend = backend.with_schema(schema.clone());
        }

        if args.once {
            if let Err(err) = backend.serve(inbound).await {
                tracing::warn!(error = %err, "caller session ended with an error");
            }
            break;
        }
        tokio::spawn(async move {
            if let Err(err) = backend.serve(inbound).await {
                tracing::warn!(error = %err, "caller session ended with an error");
            }
        });
    }

    Ok(SUCCESS)
}

fn load_schema(args: &LoopbackArgs) -> CliResult<Option<Arc<SchemaRegistry>>> {
    let Some(dir) = &args.validate else {
        return Ok(None);
    };
    let registry = SchemaRegistry::from_directory_with_config(
        dir,
        SchemaConfig {
            strict_mode: true,
            ..SchemaConfig::default()
        },
    )
    .map_err(|err| CliError::new(DATA_INVALID, format!("schema load failed: {err}")))?;
    tracing::info!(verbs = ?registry.verbs(), "request schemas loaded");
    Ok(Some(Arc::new(registry)))
}

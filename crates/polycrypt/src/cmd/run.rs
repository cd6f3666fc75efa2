use std::fs;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use polycrypt_channel::UnixChannel;
use polycrypt_client::{ClientConfig, OperationStatus, Polycrypt};
use polycrypt_wire::OperationType;
use serde_json::Value;

use crate::cmd::{runtime, RunArgs};
use crate::exit::{
    channel_error, client_error, io_error, CliError, CliResult, FAILURE, INTERNAL, SUCCESS,
    TIMEOUT, USAGE,
};
use crate::output::{print_report, OperationReport, OutputFormat};

struct Request {
    op_type: OperationType,
    algorithm: Value,
    key: Option<Value>,
    signature: Option<Vec<u8>>,
    payload: Vec<u8>,
}

pub fn run(args: RunArgs, format: OutputFormat) -> CliResult<i32> {
    let timeout = parse_duration(&args.timeout)?;
    let request = build_request(&args)?;
    let chunk_size = args.chunk_size.max(1);
    let mut config = ClientConfig::default();
    if let Some(dir) = &args.state_dir {
        config = config.with_state_dir(dir);
    }

    runtime()?.block_on(execute(args, request, config, timeout, chunk_size, format))
}

async fn execute(
    args: RunArgs,
    request: Request,
    config: ClientConfig,
    timeout: Duration,
    chunk_size: usize,
    format: OutputFormat,
) -> CliResult<i32> {
    let (channel, inbound) = UnixChannel::connect(&args.path)
        .await
        .map_err(|err| channel_error("connect failed", err))?;
    let client = Polycrypt::connect(channel, inbound, config)
        .map_err(|err| client_error("client setup failed", err))?;

    tokio::time::timeout(timeout, client.wait_until_alive())
        .await
        .map_err(|_| CliError::new(TIMEOUT, "backend did not announce readiness in time"))?
        .map_err(|err| client_error("backend unavailable", err))?;

    let op = client
        .begin_crypto_operation(
            request.op_type,
            request.algorithm,
            request.key,
            request.signature,
            None,
        )
        .map_err(|err| client_error("invalid operation", err))?;

    let errors = Arc::new(Mutex::new(Vec::new()));
    let sink = errors.clone();
    op.on_error(move |event| {
        let message = event
            .event
            .detail
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or("unspecified backend error")
            .to_string();
        if let Ok(mut errors) = sink.lock() {
            errors.push(message);
        }
    });

    for chunk in request.payload.chunks(chunk_size) {
        op.process(chunk.to_vec());
    }
    op.finish();

    let status = tokio::time::timeout(timeout, op.completion())
        .await
        .map_err(|_| CliError::new(TIMEOUT, "operation did not complete in time"))?;
    client.flush().await;

    match status {
        OperationStatus::Completed => {
            let report = OperationReport::new(
                request.op_type.as_str(),
                op.id().get(),
                op.algorithm().clone(),
                "completed",
                op.result(),
            );
            print_report(&report, format);
            Ok(SUCCESS)
        }
        OperationStatus::Aborted => Err(CliError::new(FAILURE, "operation aborted by backend")),
        OperationStatus::Errored => {
            let detail = errors
                .lock()
                .ok()
                .and_then(|errors| errors.first().cloned())
                .unwrap_or_else(|| "unspecified backend error".to_string());
            Err(CliError::new(FAILURE, format!("operation failed: {detail}")))
        }
        OperationStatus::Pending => Err(CliError::new(
            INTERNAL,
            "operation resolved without settling",
        )),
    }
}

fn build_request(args: &RunArgs) -> CliResult<Request> {
    let op_type = OperationType::from(args.op);
    if args.signature.is_some() && op_type != OperationType::Verify {
        return Err(CliError::new(USAGE, "--signature is only valid with --op verify"));
    }

    let key = args
        .key
        .as_deref()
        .map(|raw| {
            serde_json::from_str::<Value>(raw)
                .map_err(|err| CliError::new(USAGE, format!("--key is not valid JSON: {err}")))
        })
        .transpose()?;
    let signature = args
        .signature
        .as_deref()
        .map(|raw| {
            hex::decode(raw)
                .map_err(|err| CliError::new(USAGE, format!("--signature is not valid hex: {err}")))
        })
        .transpose()?;

    Ok(Request {
        op_type,
        algorithm: parse_algorithm(&args.algorithm),
        key,
        signature,
        payload: resolve_payload(args)?,
    })
}

/// JSON objects are passed through; anything else is an algorithm name.
fn parse_algorithm(raw: &str) -> Value {
    match serde_json::from_str::<Value>(raw) {
        Ok(value @ Value::Object(_)) => value,
        _ => Value::from(raw),
    }
}

fn resolve_payload(args: &RunArgs) -> CliResult<Vec<u8>> {
    if let Some(data) = &args.data {
        return Ok(data.as_bytes().to_vec());
    }
    if let Some(path) = &args.file {
        return fs::read(path)
            .map_err(|err| io_error(&format!("failed reading {}", path.display()), err));
    }
    Ok(Vec::new())
}

fn parse_duration(input: &str) -> CliResult<Duration> {
    let input = input.trim();
    if input.is_empty() {
        return Err(CliError::new(USAGE, "duration must not be empty"));
    }

    let (number, millis) = if let Some(num) = input.strip_suffix("ms") {
        (num, true)
    } else if let Some(num) = input.strip_suffix('s') {
        (num, false)
    } else {
        (input, false)
    };

    let value: u64 = number
        .parse()
        .map_err(|_| CliError::new(USAGE, format!("invalid duration value: {input}")))?;
    if value == 0 {
        return Err(CliError::new(USAGE, "duration must be greater than zero"));
    }

    Ok(if millis {
        Duration::from_millis(value)
    } else {
        Duration::from_secs(value)
    })
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use serde_json::json;

    use super::*;
    use crate::cmd::StreamOp;

    fn args(op: StreamOp) -> RunArgs {
        RunArgs {
            path: PathBuf::from("/tmp/polycrypt.sock"),
            op,
            algorithm: "SHA-256".to_string(),
            key: None,
            signature: None,
            data: Some("hello".to_string()),
            file: None,
            chunk_size: 65536,
            timeout: "5s".to_string(),
            state_dir: None,
        }
    }

    #[test]
    fn parse_duration_seconds_and_millis() {
        assert_eq!(parse_duration("2s").unwrap(), Duration::from_secs(2));
        assert_eq!(parse_duration("150ms").unwrap(), Duration::from_millis(150));
        assert_eq!(parse_duration("3").unwrap(), Duration::from_secs(3));
    }

    #[test]
    fn parse_duration_rejects_invalid_values() {
        assert!(parse_duration("0s").is_err());
        assert!(parse_duration("bad").is_err());
        assert!(parse_duration("").is_err());
    }

    #[test]
    fn algorithm_accepts_names_and_objects() {
        assert_eq!(parse_algorithm("SHA-256"), json!("SHA-256"));
        assert_eq!(
            parse_algorithm(r#"{"name": "HMAC", "hash": "SHA-256"}"#),
            json!({"name": "HMAC", "hash": "SHA-256"})
        );
        assert_eq!(parse_algorithm("42"), json!("42"));
    }

    #[test]
    fn signature_requires_verify() {
        let mut digest = args(StreamOp::Digest);
        digest.signature = Some("abcd".to_string());
        assert_eq!(build_request(&digest).err().unwrap().code, USAGE);

        let mut verify = args(StreamOp::Verify);
        verify.signature = Some("abcd".to_string());
        verify.key = Some(r#"{"handle": "k"}"#.to_string());
        let request = build_request(&verify).unwrap();
        assert_eq!(request.signature, Some(vec![0xAB, 0xCD]));
        assert_eq!(request.key, Some(json!({"handle": "k"})));
        assert_eq!(request.payload, b"hello".to_vec());
    }

    #[test]
    fn malformed_key_and_signature_are_usage_errors() {
        let mut bad_key = args(StreamOp::Sign);
        bad_key.key = Some("{not json".to_string());
        assert_eq!(build_request(&bad_key).err().unwrap().code, USAGE);

        let mut bad_signature = args(StreamOp::Verify);
        bad_signature.signature = Some("zz".to_string());
        assert_eq!(build_request(&bad_signature).err().unwrap().code, USAGE);
    }
}

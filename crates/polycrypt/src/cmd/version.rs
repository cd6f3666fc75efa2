use polycrypt_wire::{DEFAULT_MAX_PAYLOAD, MARKER};

use crate::cmd::VersionArgs;
use crate::exit::{CliResult, SUCCESS};

pub fn run(args: VersionArgs) -> CliResult<i32> {
    if !args.extended {
        println!("polycrypt {}", env!("CARGO_PKG_VERSION"));
        return Ok(SUCCESS);
    }

    println!("name: polycrypt");
    println!("version: {}", env!("CARGO_PKG_VERSION"));
    println!(
        "build_target: {}",
        option_env!("POLYCRYPT_BUILD_TARGET").unwrap_or("unknown")
    );
    println!("target_os: {}", std::env::consts::OS);
    println!("target_arch: {}", std::env::consts::ARCH);
    println!("protocol_marker: {MARKER}");
    println!("max_frame_payload: {DEFAULT_MAX_PAYLOAD}");
    println!(
        "features: loopback={}, schema={}, cli=true",
        cfg!(feature = "loopback"),
        cfg!(feature = "schema")
    );

    Ok(SUCCESS)
}

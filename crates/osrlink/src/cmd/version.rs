use crate::cmd::VersionArgs;
use crate::exit::{CliResult, SUCCESS};

pub fn run(args: VersionArgs) -> CliResult<i32> {
    if !args.extended {
        println!("osrlink {}", env!("CARGO_PKG_VERSION"));
        return Ok(SUCCESS);
    }

    println!("name: osrlink");
    println!("version: {}", env!("CARGO_PKG_VERSION"));
    println!(
        "build_target: {}",
        option_env!("OSRLINK_BUILD_TARGET").unwrap_or("unknown")
    );
    println!("target_os: {}", std::env::consts::OS);
    println!("target_arch: {}", std::env::consts::ARCH);
    println!("git_hash: {}", option_env!("GIT_HASH").unwrap_or("unknown"));
    println!(
        "wire: header={} bytes, max_payload={} bytes",
        osrlink_wire::HEADER_SIZE,
        osrlink_wire::DEFAULT_MAX_PAYLOAD
    );
    println!(
        "frame_channel: header={} bytes, default_max={}",
        osrlink_shm::HEADER_SIZE,
        osrlink_shm::FrameLayout::default()
    );

    Ok(SUCCESS)
}

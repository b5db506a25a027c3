// crates/udo-rs-linux/src/bin/udoserver.rs
//! `udoserver <config-file>`: a UDO-IP slave on port 1221 bridging
//! every request onto a serial UDO-SL device.
//!
//! The serial side is a regular UDO-SL master: the bridge connects and
//! bootstraps against the device on startup. While the serial side is
//! down, only the base objects are answered locally.

use std::env;
use std::path::Path;
use std::process::ExitCode;

use log::{error, info};
use udo_rs::master::SerialHandler;
use udo_rs::slave::{IpSlave, SlaveRequest, UdoSlaveApp, handle_base_objects};
use udo_rs::types::UDOIP_DEFAULT_PORT;
use udo_rs::UdoComm;
use udo_rs_linux::config::ServerConfig;
use udo_rs_linux::{LinuxSerialLink, LinuxSlaveUdpPort};

/// Forwards decoded UDO-IP requests to the serial master.
struct BridgeApp<'a, 'b> {
    comm: &'a mut UdoComm<'b>,
}

impl UdoSlaveApp for BridgeApp<'_, '_> {
    fn udo_read_write(&mut self, rq: &mut SlaveRequest<'_>) {
        if !self.comm.opened() {
            handle_base_objects(rq, self.comm.max_payload_size());
            return;
        }

        let result = if rq.iswrite {
            let (index, offset, len) = (rq.index, rq.offset, rq.rqlen as usize);
            self.comm
                .udo_write(index, offset, &rq.data[..len])
                .map(|_| 0)
        } else {
            let (index, offset, len) = (rq.index, rq.offset, rq.maxanslen as usize);
            self.comm.udo_read(index, offset, &mut rq.data[..len])
        };

        match result {
            Ok(anslen) => {
                rq.anslen = anslen as u16;
                rq.respond_ok();
            }
            Err(e) => {
                error!("bridge: {}", e);
                rq.respond_error(e.ecode());
            }
        }
    }
}

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    info!("UDOSERVER...");

    let Some(config_path) = env::args().nth(1) else {
        eprintln!("config file argument is missing.");
        return ExitCode::FAILURE;
    };

    info!("Config file: \"{}\"", config_path);
    let config = match ServerConfig::load(Path::new(&config_path)) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{}", e);
            return ExitCode::FAILURE;
        }
    };
    info!("Serial port: \"{}\"", config.udosl_devaddr);

    let mut serial = SerialHandler::new(LinuxSerialLink::new(&config.udosl_devaddr));
    let mut comm = UdoComm::new(&mut serial);

    info!("Connecting to device ...");
    if let Err(e) = comm.open() {
        error!("{}", e);
        return ExitCode::FAILURE;
    }
    info!("  OK, max payload {} bytes.", comm.max_payload_size());

    let mut port = match LinuxSlaveUdpPort::bind(UDOIP_DEFAULT_PORT) {
        Ok(port) => port,
        Err(e) => {
            error!("{}", e);
            return ExitCode::FAILURE;
        }
    };
    info!("UDOIP slave listening at port {} ...", UDOIP_DEFAULT_PORT);

    let mut slave = IpSlave::new();
    let mut app = BridgeApp { comm: &mut comm };

    info!("Starting main cycle.");
    loop {
        // The socket's bounded 1 ms read timeout keeps this loop off
        // 100% CPU without delaying requests.
        if let Err(e) = slave.poll(&mut port, &mut app) {
            error!("slave cycle: {}", e);
        }
    }
}

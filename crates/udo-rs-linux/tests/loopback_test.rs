// crates/udo-rs-linux/tests/loopback_test.rs
//! Real-socket loopback: an in-process UDO-IP slave on 127.0.0.1 served
//! by a thread, exercised by a master over `LinuxUdpLink`.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;

use udo_rs::master::IpHandler;
use udo_rs::slave::{IpSlave, SlaveRequest, UdoSlaveApp, handle_base_objects};
use udo_rs::{UdoComm, UdoError};
use udo_rs_linux::{LinuxSlaveUdpPort, LinuxUdpLink};

/// A 64-byte scratch object at index 0x2000 plus the base objects.
struct LoopbackApp {
    scratch: [u8; 64],
}

impl UdoSlaveApp for LoopbackApp {
    fn udo_read_write(&mut self, rq: &mut SlaveRequest<'_>) {
        if rq.index != 0x2000 {
            handle_base_objects(rq, 1024);
            return;
        }
        let start = (rq.offset as usize).min(self.scratch.len());
        let end = (start + rq.rqlen as usize).min(self.scratch.len());
        if rq.iswrite {
            let n = end - start;
            self.scratch[start..end].copy_from_slice(&rq.write_payload()[..n]);
            rq.respond_ok();
        } else {
            let chunk = self.scratch[start..end].to_vec();
            rq.respond_bytes(&chunk);
        }
    }
}

#[test]
fn udp_loopback_roundtrip() {
    let mut port = LinuxSlaveUdpPort::bind(0).expect("bind");
    let slave_port = port.local_port().expect("local port");

    let stop = Arc::new(AtomicBool::new(false));
    let slave_stop = stop.clone();
    let slave_thread = thread::spawn(move || {
        let mut slave = IpSlave::new();
        let mut app = LoopbackApp { scratch: [0; 64] };
        while !slave_stop.load(Ordering::Relaxed) {
            // The 1 ms socket timeout bounds each poll.
            let _ = slave.poll(&mut port, &mut app);
        }
    });

    let link = LinuxUdpLink::new(&format!("127.0.0.1:{}", slave_port));
    let mut handler = IpHandler::new(link);
    let mut comm = UdoComm::new(&mut handler);

    let result = (|| -> Result<(), UdoError> {
        comm.open()?;
        assert_eq!(comm.max_payload_size(), 1024);

        comm.write_u32(0x2000, 0, 0xCAFE_F00D)?;
        assert_eq!(comm.read_u32(0x2000, 0)?, 0xCAFE_F00D);

        // Blob path: fill the whole object, read it back.
        let blob: Vec<u8> = (0..64u32).map(|n| n as u8).collect();
        comm.write_blob(0x2000, 0, &blob)?;
        let mut check = vec![0u8; 64];
        assert_eq!(comm.read_blob(0x2000, 0, &mut check)?, 64);
        assert_eq!(check, blob);

        comm.close();
        Ok(())
    })();

    stop.store(true, Ordering::Relaxed);
    slave_thread.join().expect("slave thread");
    result.expect("loopback transfer");
}

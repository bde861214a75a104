// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

#![forbid(unsafe_code)]

use std::thread::{self, JoinHandle};

use hellod::HelloService;
use nexus_rendezvous::{serve, ChannelId, Kernel, Process, ServeStats};

/// A hellod server process running its loop on a dedicated thread.
pub struct RunningHellod {
    /// Server process handle.
    pub process: Process,
    /// Channel the loop serves.
    pub chid: ChannelId,
    /// Loop thread; yields the statistics once the channel closes.
    pub handle: JoinHandle<nexus_rendezvous::Result<ServeStats>>,
}

/// Spawns a hellod server process on `kernel`.
pub fn spawn_hellod(kernel: &Kernel) -> RunningHellod {
    let process = kernel.spawn();
    let chid = process.create_channel().expect("create hellod channel");
    let max_payload = kernel.config().max_payload;
    let handle = {
        let process = process.clone();
        thread::spawn(move || serve(&process, chid, &mut HelloService::new(max_payload)))
    };
    RunningHellod { process, chid, handle }
}

impl RunningHellod {
    /// Destroys the channel and returns the loop statistics.
    pub fn shutdown(self) -> ServeStats {
        self.process.destroy_channel(self.chid).expect("destroy hellod channel");
        self.handle.join().expect("hellod thread exits cleanly").expect("hellod loop result")
    }
}

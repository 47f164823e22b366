//! Per-worker kernel-mapped RX ring: socket + RX ring setup, block
//! iteration, frame header derivation, and per-packet demultiplex to
//! registered consumer predicates.

use std::net::Ipv4Addr;
use std::sync::atomic::Ordering;

use tracing::warn;

use crate::config::ReceiverConfig;
use crate::error::CaptureError;
use crate::registry::Registry;
use crate::socket::RawSocket;
use crate::tpacket::{
    Tpacket3Hdr, TpacketBlockDesc, TpacketReq3, FRAME_ALIGNMENT, PACKET_RX_RING,
};

const RETIRE_TIMEOUT_MS: u32 = 60;
const POLL_TIMEOUT_MS: i32 = 100;

/// Ethernet + IPv4 + UDP header sizes, used only to locate the UDP
/// payload; options and fragment reassembly are out of scope.
const ETH_HDR_LEN: usize = 14;
const UDP_HDR_LEN: usize = 8;

const ETH_P_IP: u16 = 0x0800;
const IPPROTO_UDP: u8 = 17;

fn round_up(value: u32, multiple: u32) -> u32 {
    value.div_ceil(multiple) * multiple
}

/// Attaches the cBPF fast-path filter when requested and built with the
/// `kernel-filter` feature; returns whether it is actually active, which
/// governs whether `classify` can skip its own header validation.
fn attach_kernel_filter(
    socket: &RawSocket,
    requested: bool,
    dest_ports: &[u16],
) -> Result<bool, CaptureError> {
    if !requested {
        return Ok(false);
    }

    #[cfg(feature = "kernel-filter")]
    {
        crate::filter::attach(socket, dest_ports)?;
        Ok(true)
    }

    #[cfg(not(feature = "kernel-filter"))]
    {
        let _ = (socket, dest_ports);
        warn!("kernel filter requested but this build was not compiled with the `kernel-filter` feature; classifying in userspace instead");
        Ok(false)
    }
}

/// Snapshot counters updated once per block (not per frame) to keep the
/// hot loop syscall- and allocation-free.
#[derive(Debug, Default, Clone, Copy)]
pub struct CaptureRingStats {
    pub processed_frames: u64,
    pub processed_bytes: u64,
    pub lost_packets: u64,
}

pub struct CaptureRing {
    socket: RawSocket,
    map: *mut u8,
    map_len: usize,
    opts: TpacketReq3,
    cur_block: u32,
    dest_ip: Ipv4Addr,
    dest_ports: Vec<u16>,
    /// Set only once a kernel-side filter was actually attached; until
    /// then `classify` always re-validates every frame in userspace.
    kernel_filter_active: bool,
}

// `map` is a kernel-owned mmap region whose lifetime is tied to `self`;
// every access goes through block/frame offsets validated against
// `map_len`.
unsafe impl Send for CaptureRing {}

impl CaptureRing {
    pub fn new(
        worker_id: usize,
        config: &ReceiverConfig,
        dest_ports: Vec<u16>,
        fanout_group: Option<u16>,
        kernel_filter_requested: bool,
    ) -> Result<Self, CaptureError> {
        let socket = RawSocket::open()?;

        let frame_size = round_up(config.frame_size, 256).max(FRAME_ALIGNMENT);
        let block_size = frame_size * config.frames_per_block;
        let mut opts = TpacketReq3 {
            tp_block_size: block_size,
            tp_block_nr: config.nof_blocks,
            tp_frame_size: frame_size,
            tp_frame_nr: (block_size * config.nof_blocks) / frame_size,
            tp_retire_blk_tov: RETIRE_TIMEOUT_MS,
            tp_sizeof_priv: 0,
            tp_feature_req_word: 0,
        };

        socket.setsockopt(libc::SOL_PACKET, PACKET_RX_RING, opts, "PACKET_RX_RING")?;

        let map_len = (opts.tp_block_size * opts.tp_block_nr) as usize;
        let map = mmap_ring(&socket, map_len)?;

        let if_index = socket.if_index(&config.interface)?;
        socket.bind(if_index, &config.interface)?;

        if let Some(group) = fanout_group {
            socket.join_fanout_cpu(group)?;
        }

        let kernel_filter_active = attach_kernel_filter(&socket, kernel_filter_requested, &dest_ports)?;

        tracing::info!(worker_id, interface = %config.interface, block_size, nof_blocks = opts.tp_block_nr, kernel_filter_active, "capture ring ready");

        // opts.tp_frame_nr is informational only past this point.
        let _ = &mut opts;

        Ok(Self {
            socket,
            map,
            map_len,
            opts,
            cur_block: 0,
            dest_ip: config.bind_ip,
            dest_ports,
            kernel_filter_active,
        })
    }

    fn block_ptr(&self, idx: u32) -> *mut TpacketBlockDesc {
        let offset = idx as usize * self.opts.tp_block_size as usize;
        debug_assert!(offset + std::mem::size_of::<TpacketBlockDesc>() <= self.map_len);
        unsafe { self.map.add(offset).cast::<TpacketBlockDesc>() }
    }

    fn block_raw(&self, idx: u32) -> *mut u8 {
        let offset = idx as usize * self.opts.tp_block_size as usize;
        unsafe { self.map.add(offset) }
    }

    /// Drains whatever blocks are currently user-owned, demultiplexing
    /// each matching UDP packet to every registered consumer whose
    /// predicate accepts it. Runs until `stop_flag` is set.
    ///
    /// Returns once `poll` observes the stop request (within `POLL_TIMEOUT_MS`).
    pub fn run(&mut self, registry: &Registry, stop_flag: &std::sync::atomic::AtomicBool, stats: &mut CaptureRingStats) {
        while !stop_flag.load(Ordering::Relaxed) {
            let desc = unsafe { &mut *self.block_ptr(self.cur_block) };
            if !desc.is_user_owned() {
                self.socket.poll_readable(POLL_TIMEOUT_MS);
                continue;
            }

            self.drain_block(self.cur_block, registry, stats);

            let desc = unsafe { &mut *self.block_ptr(self.cur_block) };
            desc.mark_kernel_owned();
            self.cur_block = (self.cur_block + 1) % self.opts.tp_block_nr;
        }
    }

    fn drain_block(&self, block_idx: u32, registry: &Registry, stats: &mut CaptureRingStats) {
        let desc = unsafe { &*self.block_ptr(block_idx) };
        let raw = self.block_raw(block_idx);
        let block_len = desc.hdr.blk_len as usize;

        // Snapshotted once per block, not per packet: the registry lock
        // is cheap relative to a block's worth of frames, and per-packet
        // locking would serialize every worker against every mutation.
        let consumers = registry.snapshot();
        let mut offset = desc.hdr.offset_to_first_pkt as usize;

        for _ in 0..desc.hdr.num_pkts {
            if offset + std::mem::size_of::<Tpacket3Hdr>() > block_len {
                warn!("frame offset past block end, truncating block early");
                break;
            }
            let hdr = unsafe { &*raw.add(offset).cast::<Tpacket3Hdr>() };
            let mac_start = unsafe { raw.add(offset + hdr.tp_mac as usize) };
            let frame_len = hdr.tp_snaplen as usize;

            stats.processed_frames += 1;
            stats.processed_bytes += frame_len as u64;

            if let Some(udp_payload) = self.classify(mac_start, frame_len) {
                for (ring, predicate) in &consumers {
                    if predicate(udp_payload) && !ring.push(udp_payload) {
                        stats.lost_packets += 1;
                    }
                }
            }

            offset += hdr.tp_next_offset as usize;
            if hdr.tp_next_offset == 0 {
                break;
            }
        }
    }

    /// Returns the UDP payload slice if the frame is IPv4/UDP to a
    /// configured destination IP/port; `None` on any mismatch. When a
    /// kernel filter is active the frame is already known-good and this
    /// degenerates to locating the payload offset only.
    fn classify<'a>(&self, mac_start: *const u8, frame_len: usize) -> Option<&'a [u8]> {
        if frame_len < ETH_HDR_LEN {
            return None;
        }
        // SAFETY: `frame_len` was checked against the block bounds by
        // the caller via `tp_snaplen`, and `mac_start` points into the
        // still user-owned block.
        let eth = unsafe { std::slice::from_raw_parts(mac_start, frame_len) };

        let ethertype = u16::from_be_bytes([eth[12], eth[13]]);
        if !self.kernel_filter_active && ethertype != ETH_P_IP {
            return None;
        }

        let ip_start = ETH_HDR_LEN;
        if frame_len < ip_start + 20 {
            return None;
        }
        let ihl = (eth[ip_start] & 0x0F) as usize * 4;
        if !self.kernel_filter_active {
            let proto = eth[ip_start + 9];
            if proto != IPPROTO_UDP {
                return None;
            }
            let dst_ip = Ipv4Addr::new(
                eth[ip_start + 16],
                eth[ip_start + 17],
                eth[ip_start + 18],
                eth[ip_start + 19],
            );
            if self.dest_ip != Ipv4Addr::UNSPECIFIED && dst_ip != self.dest_ip {
                return None;
            }
        }

        let udp_start = ip_start + ihl;
        if frame_len < udp_start + UDP_HDR_LEN {
            return None;
        }
        if !self.kernel_filter_active {
            let dst_port = u16::from_be_bytes([eth[udp_start + 2], eth[udp_start + 3]]);
            if !self.dest_ports.is_empty() && !self.dest_ports.contains(&dst_port) {
                return None;
            }
        }

        let payload_start = udp_start + UDP_HDR_LEN;
        let udp_total_len = u16::from_be_bytes([eth[udp_start + 4], eth[udp_start + 5]]) as usize;
        let payload_len = udp_total_len.saturating_sub(UDP_HDR_LEN);
        if payload_start + payload_len > frame_len {
            return None;
        }

        // SAFETY: bounds checked above against `frame_len`.
        Some(unsafe { std::slice::from_raw_parts(mac_start.add(payload_start), payload_len) })
    }

    pub fn rx_statistics(&self) -> Result<crate::tpacket::TpacketStatsV3, CaptureError> {
        self.socket.rx_statistics()
    }
}

impl Drop for CaptureRing {
    fn drop(&mut self) {
        unsafe {
            libc::munmap(self.map.cast::<libc::c_void>(), self.map_len);
        }
    }
}

fn mmap_ring(socket: &RawSocket, len: usize) -> Result<*mut u8, CaptureError> {
    let preferred = libc::MAP_SHARED | libc::MAP_LOCKED | libc::MAP_NORESERVE;
    let ptr = unsafe {
        libc::mmap(
            std::ptr::null_mut(),
            len,
            libc::PROT_READ | libc::PROT_WRITE,
            preferred,
            socket.fd,
            0,
        )
    };
    if ptr != libc::MAP_FAILED {
        return Ok(ptr.cast::<u8>());
    }

    // MAP_LOCKED can fail under a tight memlock rlimit; correctness does
    // not depend on the pages being resident, only throughput does.
    warn!("MAP_LOCKED|MAP_NORESERVE mmap failed, retrying with MAP_SHARED only");
    let ptr = unsafe {
        libc::mmap(
            std::ptr::null_mut(),
            len,
            libc::PROT_READ | libc::PROT_WRITE,
            libc::MAP_SHARED,
            socket.fd,
            0,
        )
    };
    if ptr == libc::MAP_FAILED {
        return Err(CaptureError::RingMap {
            bytes: len,
            source: std::io::Error::last_os_error(),
        });
    }
    Ok(ptr.cast::<u8>())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_up_rounds_to_multiple() {
        assert_eq!(round_up(9000, 256), 9216);
        assert_eq!(round_up(256, 256), 256);
    }
}

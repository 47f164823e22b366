//! TPACKET_V3 ABI structures and constants mirrored from
//! `linux/if_packet.h`. Field names follow the kernel header so this
//! module can be checked against it directly.

#![allow(non_camel_case_types)]

pub const TPACKET_V1: libc::c_int = 0;
pub const TPACKET_V2: libc::c_int = 1;
pub const TPACKET_V3: libc::c_int = 2;

pub const PACKET_RX_RING: libc::c_int = 5;
pub const PACKET_STATISTICS: libc::c_int = 6;
pub const PACKET_VERSION: libc::c_int = 10;
pub const PACKET_FANOUT: libc::c_int = 18;

pub const PACKET_FANOUT_HASH: libc::c_int = 0;
pub const PACKET_FANOUT_LB: libc::c_int = 1;
pub const PACKET_FANOUT_CPU: libc::c_int = 2;

pub const TP_STATUS_KERNEL: u32 = 0;
pub const TP_STATUS_USER: u32 = 1 << 0;

/// Frame sizes must be a multiple of this (`TPACKET_ALIGNMENT`).
pub const FRAME_ALIGNMENT: u32 = 16;

/// Passed to `setsockopt(SOL_PACKET, PACKET_RX_RING, ...)`.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
pub struct TpacketReq3 {
    pub tp_block_size: u32,
    pub tp_block_nr: u32,
    pub tp_frame_size: u32,
    pub tp_frame_nr: u32,
    pub tp_retire_blk_tov: u32,
    pub tp_sizeof_priv: u32,
    pub tp_feature_req_word: u32,
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
pub struct TpacketBdTs {
    pub ts_sec: u32,
    pub ts_usec_or_nsec: u32,
}

/// `union tpacket_bd_header_u`'s only populated member at TPACKET_V3.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
pub struct TpacketHdrV1 {
    pub block_status: u32,
    pub num_pkts: u32,
    pub offset_to_first_pkt: u32,
    pub blk_len: u32,
    pub seq_num: u64,
    pub ts_first_pkt: TpacketBdTs,
    pub ts_last_pkt: TpacketBdTs,
}

#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct TpacketBlockDesc {
    pub version: u32,
    pub offset_to_priv: u32,
    pub hdr: TpacketHdrV1,
}

impl TpacketBlockDesc {
    /// The kernel writes `block_status` from its own context without any
    /// lock this process holds; it is the synchronization boundary
    /// between kernel and userspace ownership of the block, so a
    /// volatile read is the minimum needed to stop the compiler from
    /// hoisting or caching this load across the poll loop.
    #[inline]
    pub fn is_user_owned(&self) -> bool {
        let status = unsafe { std::ptr::addr_of!(self.hdr.block_status).read_volatile() };
        status & TP_STATUS_USER != 0
    }

    #[inline]
    pub fn mark_kernel_owned(&mut self) {
        unsafe {
            std::ptr::addr_of_mut!(self.hdr.block_status).write_volatile(TP_STATUS_KERNEL);
        }
    }
}

/// Per-frame header preceding each captured packet within a block.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct Tpacket3Hdr {
    pub tp_next_offset: u32,
    pub tp_sec: u32,
    pub tp_nsec: u32,
    pub tp_snaplen: u32,
    pub tp_len: u32,
    pub tp_status: u32,
    pub tp_mac: u16,
    pub tp_net: u16,
    pub tp_vlan_tci: u16,
    pub tp_vlan_tpid: u16,
    pub tp_padding: [u8; 4],
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
pub struct TpacketStatsV3 {
    pub tp_packets: u32,
    pub tp_drops: u32,
    pub tp_freeze_q_cnt: u32,
}

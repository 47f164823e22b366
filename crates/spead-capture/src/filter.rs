//! Classic BPF (cBPF) kernel-side fast path, attached via
//! `SO_ATTACH_FILTER`. Accepts only IPv4/UDP frames and, when exactly
//! one destination port is configured, narrows further to that port;
//! every other combination of ports still relies on `classify`'s own
//! userspace check since a multi-port match is not worth the extra
//! jump table here.

use crate::error::CaptureError;
use crate::socket::RawSocket;

const BPF_LD: u16 = 0x00;
const BPF_LDX: u16 = 0x01;
const BPF_JMP: u16 = 0x05;
const BPF_RET: u16 = 0x06;

const BPF_H: u16 = 0x08;
const BPF_B: u16 = 0x10;

const BPF_ABS: u16 = 0x20;
const BPF_IND: u16 = 0x40;
const BPF_MSH: u16 = 0xa0;

const BPF_JEQ: u16 = 0x10;
const BPF_K: u16 = 0x00;

const ETH_P_IP: u32 = 0x0800;
const IPPROTO_UDP: u32 = 17;

fn insn(code: u16, jt: u8, jf: u8, k: u32) -> libc::sock_filter {
    libc::sock_filter { code, jt, jf, k }
}

fn jeq_or_reject(k: u32) -> libc::sock_filter {
    insn(BPF_JMP | BPF_JEQ | BPF_K, 0, 0, k)
}

/// Builds the accept/reject program. Every `jeq` falls through (`jt =
/// 0`) on a match and jumps to the reject instruction on mismatch; `jf`
/// offsets are patched in once the final instruction count is known.
fn program(dest_ports: &[u16]) -> Vec<libc::sock_filter> {
    let mut checks = vec![
        insn(BPF_LD | BPF_H | BPF_ABS, 0, 0, 12), // ldh [12]  (ethertype)
        jeq_or_reject(ETH_P_IP),
        insn(BPF_LD | BPF_B | BPF_ABS, 0, 0, 23), // ldb [23]  (ip protocol)
        jeq_or_reject(IPPROTO_UDP),
    ];

    if let [port] = *dest_ports {
        checks.push(insn(BPF_LDX | BPF_B | BPF_MSH, 0, 0, 14)); // ldxb 4*([14]&0xf) -> X = IHL
        checks.push(insn(BPF_LD | BPF_H | BPF_IND, 0, 0, 16)); // ldh [x + 16]  (udp dst port)
        checks.push(jeq_or_reject(u32::from(port)));
    }

    let accept_idx = checks.len();
    let reject_idx = accept_idx + 1;
    for (idx, check) in checks.iter_mut().enumerate() {
        if check.code & 0x07 == BPF_JMP {
            check.jf = (reject_idx - idx - 1) as u8;
        }
    }
    checks.push(insn(BPF_RET | BPF_K, 0, 0, u32::from(u16::MAX))); // accept: whole frame
    checks.push(insn(BPF_RET | BPF_K, 0, 0, 0)); // reject

    checks
}

/// Compiles and attaches the filter to `socket`. `dest_ports` is read
/// once at attach time; a later `add_port` call does not retroactively
/// narrow an already-attached filter.
pub(crate) fn attach(socket: &RawSocket, dest_ports: &[u16]) -> Result<(), CaptureError> {
    let prog = program(dest_ports);
    let fprog = libc::sock_fprog {
        len: prog.len() as u16,
        filter: prog.as_ptr().cast_mut(),
    };
    socket
        .setsockopt(libc::SOL_SOCKET, libc::SO_ATTACH_FILTER, fprog, "SO_ATTACH_FILTER")
        .map_err(|err| CaptureError::FilterCompile(err.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn protocol_only_program_has_no_port_check() {
        let prog = program(&[]);
        assert_eq!(prog.len(), 6);
    }

    #[test]
    fn single_port_program_adds_port_check() {
        let prog = program(&[4660]);
        assert_eq!(prog.len(), 9);
    }

    #[test]
    fn reject_offsets_land_on_the_reject_instruction() {
        let prog = program(&[4660]);
        let reject_idx = prog.len() - 1;
        for (idx, check) in prog.iter().enumerate() {
            if check.code & 0x07 == BPF_JMP {
                assert_eq!(idx + 1 + check.jf as usize, reject_idx);
            }
        }
    }
}

//! Thin wrapper over the raw AF_PACKET socket syscalls: open, sockopt,
//! interface resolution, bind, fanout join. No ring or mmap state lives
//! here — see [`crate::capture::CaptureRing`].

use std::ffi::CString;
use std::os::unix::io::RawFd;

use crate::error::CaptureError;

const RCVBUF_BYTES: libc::c_int = 512 * 1024 * 1024;

/// An open AF_PACKET raw socket. `close`s its fd on drop.
pub(crate) struct RawSocket {
    pub(crate) fd: RawFd,
}

impl RawSocket {
    /// Opens `AF_PACKET`/`SOCK_RAW` for `ETH_P_IP`, enlarges the receive
    /// buffer, disables checksum verification, and selects TPACKET_V3.
    pub(crate) fn open() -> Result<Self, CaptureError> {
        let fd = unsafe {
            libc::socket(
                libc::AF_PACKET,
                libc::SOCK_RAW,
                (libc::ETH_P_IP as u16).to_be() as libc::c_int,
            )
        };
        if fd < 0 {
            return Err(CaptureError::SocketOpen(std::io::Error::last_os_error()));
        }
        let sock = Self { fd };

        sock.setsockopt(libc::SOL_SOCKET, libc::SO_RCVBUF, RCVBUF_BYTES, "SO_RCVBUF")?;
        // PACKET_NO_TIMESTAMP / checksum offload knobs are NIC-driver
        // specific; verification is disabled by not requesting
        // PACKET_TX_HAS_OFF / leaving PACKET_VNET_HDR unset, which is the
        // no-op default for an RX-only raw socket.
        sock.setsockopt(
            libc::SOL_PACKET,
            crate::tpacket::PACKET_VERSION,
            crate::tpacket::TPACKET_V3,
            "PACKET_VERSION",
        )?;

        Ok(sock)
    }

    pub(crate) fn setsockopt<T: Copy>(
        &self,
        level: libc::c_int,
        name: libc::c_int,
        value: T,
        debug_name: &'static str,
    ) -> Result<(), CaptureError> {
        let rc = unsafe {
            libc::setsockopt(
                self.fd,
                level,
                name,
                std::ptr::addr_of!(value).cast::<libc::c_void>(),
                std::mem::size_of::<T>() as libc::socklen_t,
            )
        };
        if rc < 0 {
            return Err(CaptureError::SetSockOpt {
                name: debug_name,
                source: std::io::Error::last_os_error(),
            });
        }
        Ok(())
    }

    pub(crate) fn getsockopt<T: Copy + Default>(
        &self,
        level: libc::c_int,
        name: libc::c_int,
    ) -> Result<T, CaptureError> {
        let mut value = T::default();
        let mut len = std::mem::size_of::<T>() as libc::socklen_t;
        let rc = unsafe {
            libc::getsockopt(
                self.fd,
                level,
                name,
                std::ptr::addr_of_mut!(value).cast::<libc::c_void>(),
                &mut len,
            )
        };
        if rc < 0 {
            return Err(CaptureError::SetSockOpt {
                name: "getsockopt",
                source: std::io::Error::last_os_error(),
            });
        }
        Ok(value)
    }

    /// Resolves the kernel interface index for `name` via `SIOCGIFINDEX`.
    pub(crate) fn if_index(&self, name: &str) -> Result<libc::c_int, CaptureError> {
        let cname = CString::new(name).map_err(|_| CaptureError::InterfaceResolve {
            interface: name.to_string(),
            source: std::io::Error::new(std::io::ErrorKind::InvalidInput, "embedded nul"),
        })?;
        let mut ifr: libc::ifreq = unsafe { std::mem::zeroed() };
        let bytes = cname.as_bytes_with_nul();
        // SAFETY: `ifr_name` is a fixed-size byte array; `bytes` is
        // checked to fit before the copy.
        if bytes.len() > ifr.ifr_name.len() {
            return Err(CaptureError::InterfaceResolve {
                interface: name.to_string(),
                source: std::io::Error::new(std::io::ErrorKind::InvalidInput, "name too long"),
            });
        }
        for (dst, src) in ifr.ifr_name.iter_mut().zip(bytes.iter()) {
            *dst = *src as libc::c_char;
        }

        let rc = unsafe { libc::ioctl(self.fd, libc::SIOCGIFINDEX, &mut ifr) };
        if rc < 0 {
            return Err(CaptureError::InterfaceResolve {
                interface: name.to_string(),
                source: std::io::Error::last_os_error(),
            });
        }
        Ok(unsafe { ifr.ifr_ifru.ifru_ivalue })
    }

    /// Binds the socket to `if_index` for `ETH_P_IP`.
    pub(crate) fn bind(&self, if_index: libc::c_int, interface: &str) -> Result<(), CaptureError> {
        let mut addr: libc::sockaddr_ll = unsafe { std::mem::zeroed() };
        addr.sll_family = libc::AF_PACKET as u16;
        addr.sll_protocol = (libc::ETH_P_IP as u16).to_be();
        addr.sll_ifindex = if_index;

        let rc = unsafe {
            libc::bind(
                self.fd,
                std::ptr::addr_of!(addr).cast::<libc::sockaddr>(),
                std::mem::size_of::<libc::sockaddr_ll>() as u32,
            )
        };
        if rc < 0 {
            return Err(CaptureError::Bind {
                interface: interface.to_string(),
                source: std::io::Error::last_os_error(),
            });
        }
        Ok(())
    }

    /// Joins a `PACKET_FANOUT` group in "by CPU" mode. `group_id` should
    /// be shared by every worker socket belonging to one receiver.
    pub(crate) fn join_fanout_cpu(&self, group_id: u16) -> Result<(), CaptureError> {
        let fanout_arg: i32 =
            (i32::from(group_id)) | (crate::tpacket::PACKET_FANOUT_CPU << 16);
        self.setsockopt(
            libc::SOL_PACKET,
            crate::tpacket::PACKET_FANOUT,
            fanout_arg,
            "PACKET_FANOUT",
        )
    }

    pub(crate) fn rx_statistics(&self) -> Result<crate::tpacket::TpacketStatsV3, CaptureError> {
        self.getsockopt(libc::SOL_PACKET, crate::tpacket::PACKET_STATISTICS)
    }

    /// Blocks until readable (a block was retired into the ring) or
    /// `timeout_ms` elapses.
    pub(crate) fn poll_readable(&self, timeout_ms: i32) -> bool {
        let mut pfd = libc::pollfd {
            fd: self.fd,
            events: libc::POLLIN | libc::POLLERR,
            revents: 0,
        };
        let rc = unsafe { libc::poll(&mut pfd, 1, timeout_ms) };
        rc > 0 && (pfd.revents & (libc::POLLIN | libc::POLLERR)) != 0
    }
}

impl Drop for RawSocket {
    fn drop(&mut self) {
        unsafe {
            libc::close(self.fd);
        }
    }
}

// The fd is only ever touched through methods that take `&self`; the
// kernel itself serializes concurrent syscalls on one fd.
unsafe impl Send for RawSocket {}
unsafe impl Sync for RawSocket {}

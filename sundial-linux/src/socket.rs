//! UDP/IPv4 packet interface for the linux platform: one event socket (319)
//! and one general socket (320) per configured interface, with kernel
//! receive timestamps.

use std::io;
use std::net::Ipv4Addr;
use std::os::unix::io::RawFd;

use sundial::network::{PacketInterface, ReceivedFrame};
use sundial::time::Timestamp;

use crate::config::InterfaceConfig;

pub const EVENT_PORT: u16 = 319;
pub const GENERAL_PORT: u16 = 320;

/// The multicast group of the primary PTP domain.
pub const PRIMARY_MULTICAST: Ipv4Addr = Ipv4Addr::new(224, 0, 1, 129);

const RECV_BUFFER_SIZE: usize = 512;
const CONTROL_BUFFER_SIZE: usize = 256;

/// An owned raw socket.
#[derive(Debug)]
struct Socket(RawFd);

impl Drop for Socket {
    fn drop(&mut self) {
        unsafe {
            libc::close(self.0);
        }
    }
}

fn check(result: libc::c_int) -> io::Result<libc::c_int> {
    if result == -1 {
        Err(io::Error::last_os_error())
    } else {
        Ok(result)
    }
}

unsafe fn set_option<T>(
    fd: RawFd,
    level: libc::c_int,
    option: libc::c_int,
    value: &T,
) -> io::Result<()> {
    check(libc::setsockopt(
        fd,
        level,
        option,
        value as *const T as *const libc::c_void,
        std::mem::size_of::<T>() as libc::socklen_t,
    ))?;
    Ok(())
}

fn socket_address(address: Ipv4Addr, port: u16) -> libc::sockaddr_in {
    libc::sockaddr_in {
        sin_family: libc::AF_INET as libc::sa_family_t,
        sin_port: port.to_be(),
        sin_addr: libc::in_addr {
            s_addr: u32::from(address).to_be(),
        },
        sin_zero: [0; 8],
    }
}

/// Fill an ifreq with the interface name, for the SIOCGIF* ioctls.
fn interface_request(name: &str) -> io::Result<libc::ifreq> {
    let mut request: libc::ifreq = unsafe { std::mem::zeroed() };

    if name.len() >= request.ifr_name.len() {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            "interface name too long",
        ));
    }
    for (dst, src) in request.ifr_name.iter_mut().zip(name.as_bytes()) {
        *dst = *src as libc::c_char;
    }

    Ok(request)
}

fn with_probe_socket<T>(run: impl FnOnce(RawFd) -> io::Result<T>) -> io::Result<T> {
    let fd = check(unsafe { libc::socket(libc::AF_INET, libc::SOCK_DGRAM, 0) })?;
    let socket = Socket(fd);
    run(socket.0)
}

/// The IPv4 address assigned to a network interface.
pub fn interface_address(name: &str) -> io::Result<Ipv4Addr> {
    with_probe_socket(|fd| {
        let mut request = interface_request(name)?;
        check(unsafe { libc::ioctl(fd, libc::SIOCGIFADDR, &mut request) })?;

        let address = unsafe {
            *(&request.ifr_ifru.ifru_addr as *const libc::sockaddr as *const libc::sockaddr_in)
        };
        Ok(Ipv4Addr::from(u32::from_be(address.sin_addr.s_addr)))
    })
}

/// The link-layer address of a network interface, used to derive the clock
/// identity.
pub fn mac_address(name: &str) -> io::Result<[u8; 6]> {
    with_probe_socket(|fd| {
        let mut request = interface_request(name)?;
        check(unsafe { libc::ioctl(fd, libc::SIOCGIFHWADDR, &mut request) })?;

        let hwaddr = unsafe { request.ifr_ifru.ifru_hwaddr };
        let mut mac = [0u8; 6];
        for (dst, src) in mac.iter_mut().zip(hwaddr.sa_data.iter()) {
            *dst = *src as u8;
        }
        Ok(mac)
    })
}

fn open_socket(
    interface: &str,
    port: u16,
    interface_addr: Ipv4Addr,
    multicast: bool,
) -> io::Result<Socket> {
    unsafe {
        let fd = check(libc::socket(
            libc::AF_INET,
            libc::SOCK_DGRAM | libc::SOCK_NONBLOCK,
            0,
        ))?;
        let socket = Socket(fd);

        let on: libc::c_int = 1;
        set_option(fd, libc::SOL_SOCKET, libc::SO_REUSEADDR, &on)?;
        set_option(fd, libc::SOL_SOCKET, libc::SO_TIMESTAMPNS, &on)?;

        // one socket pair per interface
        check(libc::setsockopt(
            fd,
            libc::SOL_SOCKET,
            libc::SO_BINDTODEVICE,
            interface.as_ptr() as *const libc::c_void,
            interface.len() as libc::socklen_t,
        ))?;

        let bind_address = socket_address(Ipv4Addr::UNSPECIFIED, port);
        check(libc::bind(
            fd,
            &bind_address as *const libc::sockaddr_in as *const libc::sockaddr,
            std::mem::size_of::<libc::sockaddr_in>() as libc::socklen_t,
        ))?;

        if multicast {
            let membership = libc::ip_mreq {
                imr_multiaddr: libc::in_addr {
                    s_addr: u32::from(PRIMARY_MULTICAST).to_be(),
                },
                imr_interface: libc::in_addr {
                    s_addr: u32::from(interface_addr).to_be(),
                },
            };
            set_option(fd, libc::IPPROTO_IP, libc::IP_ADD_MEMBERSHIP, &membership)?;
        }

        let outgoing = libc::in_addr {
            s_addr: u32::from(interface_addr).to_be(),
        };
        set_option(fd, libc::IPPROTO_IP, libc::IP_MULTICAST_IF, &outgoing)?;

        let ttl: libc::c_int = 1;
        set_option(fd, libc::IPPROTO_IP, libc::IP_MULTICAST_TTL, &ttl)?;

        // the engine detects its own frames coming back and uses them as
        // send completions, so loopback must stay enabled
        let loopback: libc::c_int = 1;
        set_option(fd, libc::IPPROTO_IP, libc::IP_MULTICAST_LOOP, &loopback)?;

        Ok(socket)
    }
}

#[derive(Debug)]
struct NetworkPort {
    port_number: u16,
    event: Socket,
    general: Socket,
    multicast: bool,
    unicast_peers: Vec<Ipv4Addr>,
}

/// All sockets of the daemon, one event/general pair per interface. Ports
/// are numbered 1..N in configuration order.
#[derive(Debug)]
pub struct PtpNetwork {
    ports: Vec<NetworkPort>,
}

impl PtpNetwork {
    pub fn open(interfaces: &[InterfaceConfig]) -> io::Result<Self> {
        let mut ports = Vec::with_capacity(interfaces.len());

        for (index, interface) in interfaces.iter().enumerate() {
            let address = interface_address(&interface.name)?;
            let event = open_socket(&interface.name, EVENT_PORT, address, interface.multicast)?;
            let general = open_socket(&interface.name, GENERAL_PORT, address, interface.multicast)?;

            log::info!(
                "opened {} as port {} ({})",
                interface.name,
                index + 1,
                address
            );

            ports.push(NetworkPort {
                port_number: index as u16 + 1,
                event,
                general,
                multicast: interface.multicast,
                unicast_peers: interface.unicast.clone(),
            });
        }

        Ok(Self { ports })
    }

    fn send_to(fd: RawFd, frame: &[u8], address: Ipv4Addr, port: u16) -> io::Result<()> {
        let destination = socket_address(address, port);
        let sent = unsafe {
            libc::sendto(
                fd,
                frame.as_ptr() as *const libc::c_void,
                frame.len(),
                0,
                &destination as *const libc::sockaddr_in as *const libc::sockaddr,
                std::mem::size_of::<libc::sockaddr_in>() as libc::socklen_t,
            )
        };

        if sent == frame.len() as isize {
            Ok(())
        } else {
            Err(io::Error::last_os_error())
        }
    }

    /// Receive from one readable socket, extracting the kernel receive
    /// timestamp from the control messages.
    fn recv_one(&self, fd: RawFd, port_number: u16) -> io::Result<Option<ReceivedFrame>> {
        let mut buffer = [0u8; RECV_BUFFER_SIZE];
        let mut control = [0u8; CONTROL_BUFFER_SIZE];

        let mut iov = libc::iovec {
            iov_base: buffer.as_mut_ptr() as *mut libc::c_void,
            iov_len: buffer.len(),
        };
        let mut message: libc::msghdr = unsafe { std::mem::zeroed() };
        message.msg_iov = &mut iov;
        message.msg_iovlen = 1;
        message.msg_control = control.as_mut_ptr() as *mut libc::c_void;
        message.msg_controllen = control.len();

        let len = unsafe { libc::recvmsg(fd, &mut message, 0) };
        if len < 0 {
            let error = io::Error::last_os_error();
            return match error.kind() {
                io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted => Ok(None),
                _ => Err(error),
            };
        }

        let mut timestamp = software_timestamp_fallback();
        unsafe {
            let mut cmsg = libc::CMSG_FIRSTHDR(&message);
            while !cmsg.is_null() {
                if (*cmsg).cmsg_level == libc::SOL_SOCKET
                    && (*cmsg).cmsg_type == libc::SCM_TIMESTAMPNS
                {
                    let ts: libc::timespec =
                        std::ptr::read_unaligned(libc::CMSG_DATA(cmsg) as *const libc::timespec);
                    timestamp = Timestamp {
                        seconds: ts.tv_sec as u64,
                        nanos: ts.tv_nsec as u32,
                        subnanos: 0,
                    };
                }
                cmsg = libc::CMSG_NXTHDR(&message, cmsg);
            }
        }

        match ReceivedFrame::new(port_number, &buffer[..len as usize], timestamp) {
            Some(frame) => Ok(Some(frame)),
            None => {
                log::debug!("oversized frame on port {port_number} dropped");
                Ok(None)
            }
        }
    }
}

fn software_timestamp_fallback() -> Timestamp {
    let mut ts = libc::timespec {
        tv_sec: 0,
        tv_nsec: 0,
    };
    if unsafe { libc::clock_gettime(libc::CLOCK_REALTIME, &mut ts) } == 0 {
        Timestamp {
            seconds: ts.tv_sec as u64,
            nanos: ts.tv_nsec as u32,
            subnanos: 0,
        }
    } else {
        Timestamp::default()
    }
}

impl PacketInterface for PtpNetwork {
    type Error = io::Error;

    fn send(&mut self, port_number: u16, event: bool, frame: &[u8]) -> Result<(), Self::Error> {
        let port = self
            .ports
            .iter()
            .find(|port| port.port_number == port_number)
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "no such port"))?;

        let (fd, destination_port) = if event {
            (port.event.0, EVENT_PORT)
        } else {
            (port.general.0, GENERAL_PORT)
        };

        if port.multicast {
            Self::send_to(fd, frame, PRIMARY_MULTICAST, destination_port)?;
        }
        for peer in &port.unicast_peers {
            Self::send_to(fd, frame, *peer, destination_port)?;
        }

        Ok(())
    }

    fn recv(&mut self, timeout_micros: u32) -> Result<Option<ReceivedFrame>, Self::Error> {
        let mut pollfds: Vec<libc::pollfd> = self
            .ports
            .iter()
            .flat_map(|port| {
                [port.event.0, port.general.0].map(|fd| libc::pollfd {
                    fd,
                    events: libc::POLLIN,
                    revents: 0,
                })
            })
            .collect();

        let timeout = libc::timespec {
            tv_sec: (timeout_micros / 1_000_000) as libc::time_t,
            tv_nsec: (timeout_micros % 1_000_000) as libc::c_long * 1000,
        };

        let ready = unsafe {
            libc::ppoll(
                pollfds.as_mut_ptr(),
                pollfds.len() as libc::nfds_t,
                &timeout,
                std::ptr::null(),
            )
        };
        if ready == -1 {
            let error = io::Error::last_os_error();
            return match error.kind() {
                // a signal arrived; let the event loop check its flags
                io::ErrorKind::Interrupted => Ok(None),
                _ => Err(error),
            };
        }
        if ready == 0 {
            return Ok(None);
        }

        for (index, pollfd) in pollfds.iter().enumerate() {
            if pollfd.revents & libc::POLLIN != 0 {
                let port_number = self.ports[index / 2].port_number;
                if let Some(frame) = self.recv_one(pollfd.fd, port_number)? {
                    return Ok(Some(frame));
                }
            }
        }

        Ok(None)
    }
}

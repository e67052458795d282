use std::env;

use serialport::SerialPort;

use caen_hv::session::{Session, SessionConfig};

// Configuration constants - adjust these for your setup
const BAUD_RATE: u32 = 9600;
// The module can take a moment to answer, a reasonably large time out is required.
const SERIAL_TIMEOUT_MS: u64 = 300;
const TARGET_VOLTAGE_V: f64 = 1500.0;
const CURRENT_LIMIT_UA: f64 = 10.0;
const RAMP_UP_V_PER_S: f64 = 50.0;
const POLL_INTERVAL_MS: u64 = 500;

pub struct PortWrapper(Box<dyn SerialPort>);

#[derive(Debug)]
pub struct IoError(std::io::Error);

impl core::fmt::Display for IoError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::error::Error for IoError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.0)
    }
}

impl embedded_io::Error for IoError {
    fn kind(&self) -> embedded_io::ErrorKind {
        match self.0.kind() {
            std::io::ErrorKind::NotFound => embedded_io::ErrorKind::NotFound,
            std::io::ErrorKind::PermissionDenied => embedded_io::ErrorKind::PermissionDenied,
            std::io::ErrorKind::ConnectionRefused => embedded_io::ErrorKind::ConnectionRefused,
            std::io::ErrorKind::ConnectionReset => embedded_io::ErrorKind::ConnectionReset,
            std::io::ErrorKind::ConnectionAborted => embedded_io::ErrorKind::ConnectionAborted,
            std::io::ErrorKind::NotConnected => embedded_io::ErrorKind::NotConnected,
            std::io::ErrorKind::AddrInUse => embedded_io::ErrorKind::AddrInUse,
            std::io::ErrorKind::AddrNotAvailable => embedded_io::ErrorKind::AddrNotAvailable,
            std::io::ErrorKind::BrokenPipe => embedded_io::ErrorKind::BrokenPipe,
            std::io::ErrorKind::AlreadyExists => embedded_io::ErrorKind::AlreadyExists,
            std::io::ErrorKind::InvalidInput => embedded_io::ErrorKind::InvalidInput,
            std::io::ErrorKind::InvalidData => embedded_io::ErrorKind::InvalidData,
            std::io::ErrorKind::TimedOut => embedded_io::ErrorKind::TimedOut,
            std::io::ErrorKind::Interrupted => embedded_io::ErrorKind::Interrupted,
            std::io::ErrorKind::Unsupported => embedded_io::ErrorKind::Unsupported,
            std::io::ErrorKind::OutOfMemory => embedded_io::ErrorKind::OutOfMemory,
            _ => embedded_io::ErrorKind::Other,
        }
    }
}

impl embedded_io::ErrorType for PortWrapper {
    type Error = IoError;
}

impl embedded_io::Read for PortWrapper {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, Self::Error> {
        std::io::Read::read(&mut self.0, buf).map_err(IoError)
    }
}

impl embedded_io::Write for PortWrapper {
    fn write(&mut self, buf: &[u8]) -> Result<usize, Self::Error> {
        std::io::Write::write(&mut self.0, buf).map_err(IoError)
    }

    fn flush(&mut self) -> Result<(), Self::Error> {
        std::io::Write::flush(&mut self.0).map_err(IoError)
    }
}

fn main() {
    env_logger::init();

    // Get serial port from command line arg, or list what is available
    let port_name = env::args().nth(1).unwrap_or_else(|| {
        let ports = serialport::available_ports().expect("Failed to enumerate serial ports");
        eprintln!("Usage: serial <port>");
        if ports.is_empty() {
            eprintln!("No serial ports found!");
        } else {
            eprintln!("Available ports:");
            for port in ports {
                eprintln!("  {}", port.port_name);
            }
        }
        std::process::exit(1);
    });

    println!("Using port: {}", port_name);

    // Open serial port
    let port = serialport::new(&port_name, BAUD_RATE)
        .timeout(std::time::Duration::from_millis(SERIAL_TIMEOUT_MS))
        .open()
        .expect("Failed to open serial port");

    let port = PortWrapper(port);

    // Connect and discover the board
    let session = Session::connect(port, SessionConfig::default()).expect("Failed to connect");

    let board = session.board(0).unwrap();
    println!(
        "Found {} (firmware {}, serial {})",
        board.name, board.firmware, board.serial
    );
    for index in 0..board.channel_count() {
        let channel = session.channel(0, index).unwrap();
        println!(
            "  channel {}: MAXV {:?} V, MAXI {:?} uA",
            index, channel.max_voltage, channel.max_current
        );
    }

    // Configure channel 0 and switch it on
    session
        .set_ramp_up(0, 0, RAMP_UP_V_PER_S)
        .expect("Failed to set ramp-up rate");
    session
        .set_current_limit(0, 0, CURRENT_LIMIT_UA)
        .expect("Failed to set current limit");
    session
        .set_voltage(0, 0, TARGET_VOLTAGE_V)
        .expect("Failed to set voltage");
    session.turn_on(0, 0).expect("Failed to switch the channel on");
    println!("Channel 0 ramping to {}V", TARGET_VOLTAGE_V);

    // Watch the ramp until the output settles
    loop {
        std::thread::sleep(std::time::Duration::from_millis(POLL_INTERVAL_MS));

        let status = session.channel_status(0, 0).expect("Failed to read status");
        let voltage = session
            .measured_voltage(0, 0)
            .expect("Failed to read voltage");
        let current = session
            .measured_current(0, 0)
            .expect("Failed to read current");
        println!("VMON {:8.1} V  IMON {:7.2} uA  {:?}", voltage, current, status);

        if status.tripped() || status.over_current() {
            println!("Channel faulted, switching off");
            session.turn_off(0, 0).expect("Failed to switch the channel off");
            break;
        }
        if !status.ramping_up() && status.on() {
            println!("Output settled");
            break;
        }
    }

    // Leave the channel off when experimenting
    session.turn_off(0, 0).expect("Failed to switch the channel off");
    println!("Channel 0 off");
}

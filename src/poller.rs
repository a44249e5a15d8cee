//! Blocking poller for sensors sharing one RS-485 line.
//!
//! The bus is half-duplex: a request is written, the line is left quiet for
//! the configured inter-frame delay and only then is the response read.
//! That single wait per sensor is also the gap before the next request.
//! Sensors are polled strictly one after another and a fault on one sensor
//! never stops the remaining ones from being polled.
//!
//! Any `std::io::Read + std::io::Write` channel can be used, typically the
//! serial port returned by [`crate::serial::open`].
//!
//! # Example
//!
//! ```no_run
//! use pomas_lib::poller::{PollerConfig, SensorPoller};
//! use pomas_lib::protocol::{Address, BaudRate, Sensor, SensorKind};
//! use std::time::Duration;
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut port = pomas_lib::serial::open("/dev/ttyUSB0", BaudRate::B9600, Duration::from_secs(2))?;
//!     let poller = SensorPoller::new(PollerConfig::default());
//!     let sensors = [
//!         Sensor::new(Address::from(0x01), SensorKind::Soil),
//!         Sensor::new(Address::from(0x07), SensorKind::Ph),
//!     ];
//!     for exchange in poller.poll_all(&mut port, &sensors) {
//!         match exchange.result {
//!             Ok(measurement) => println!("{}: {}", exchange.sensor, measurement),
//!             Err(error) => println!("{}: {}", exchange.sensor, error),
//!         }
//!     }
//!     Ok(())
//! }
//! ```

use crate::{
    protocol::{self as proto, Measurement, RequestFrame, Sensor},
    Error, Result,
};
use std::{
    io::{self, Read, Write},
    sync::atomic::{AtomicBool, Ordering},
    time::Duration,
};

/// Default quiet time between a request and its response.
pub const DEFAULT_INTER_FRAME_DELAY: Duration = Duration::from_millis(500);

/// Settings of a [`SensorPoller`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollerConfig {
    /// Quiet time after each request, before its response is read.
    pub inter_frame_delay: Duration,
    /// Reject responses whose address byte differs from the polled sensor.
    pub verify_address: bool,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            inter_frame_delay: DEFAULT_INTER_FRAME_DELAY,
            verify_address: false,
        }
    }
}

/// The outcome of one request/response exchange with a sensor.
#[derive(Debug)]
pub struct Exchange {
    pub sensor: Sensor,
    pub request: RequestFrame,
    /// The bytes received, possibly fewer than expected.
    pub response: Vec<u8>,
    pub result: Result<Measurement>,
}

impl Exchange {
    pub fn is_ok(&self) -> bool {
        self.result.is_ok()
    }
}

/// Polls sensors over a shared byte channel.
#[derive(Debug, Clone, Default)]
pub struct SensorPoller {
    config: PollerConfig,
}

impl SensorPoller {
    pub fn new(config: PollerConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &PollerConfig {
        &self.config
    }

    /// Performs one exchange with `sensor`.
    ///
    /// Channel failures are reported in [`Exchange::result`] as
    /// [`Error::Io`], a response shorter than expected as [`Error::Length`].
    pub fn poll<T>(&self, channel: &mut T, sensor: &Sensor) -> Exchange
    where
        T: Read + Write + ?Sized,
    {
        let request = sensor.request();
        if !sensor.address.is_unicast() {
            log::warn!("Polling {sensor} on a reserved Modbus address");
        }
        log::debug!("Sending command to {sensor}: {request}");

        let (response, result) = match self.transfer(channel, &request, sensor.response_len()) {
            Ok(response) => {
                log::debug!(
                    "Response from {sensor}: {}",
                    proto::HexBytes(&response)
                );
                let result = self.decode(&response, sensor);
                (response, result)
            }
            Err(error) => {
                log::warn!("Exchange with {sensor} failed: {error}");
                (Vec::new(), Err(Error::Io(error)))
            }
        };
        Exchange {
            sensor: *sensor,
            request,
            response,
            result,
        }
    }

    /// Polls every sensor once, in order.
    ///
    /// The returned exchanges are in the same order as `sensors`, one per
    /// sensor, whether it answered or not.
    pub fn poll_all<T>(&self, channel: &mut T, sensors: &[Sensor]) -> Vec<Exchange>
    where
        T: Read + Write + ?Sized,
    {
        self.poll_while(channel, sensors, || true)
    }

    /// Polls the sensors round after round until `running` is cleared.
    ///
    /// `on_round` is called after every round with the round number
    /// (starting at 1) and its exchanges. The flag is checked before every
    /// exchange; a round interrupted by it is still reported, with fewer
    /// exchanges than `sensors`. Returns the number of rounds reported.
    pub fn poll_repeat<T, F>(
        &self,
        channel: &mut T,
        sensors: &[Sensor],
        running: &AtomicBool,
        mut on_round: F,
    ) -> usize
    where
        T: Read + Write + ?Sized,
        F: FnMut(usize, &[Exchange]),
    {
        let mut rounds = 0;
        while running.load(Ordering::SeqCst) {
            let exchanges = self.poll_while(channel, sensors, || running.load(Ordering::SeqCst));
            rounds += 1;
            if exchanges.len() < sensors.len() {
                log::info!(
                    "Round {rounds} interrupted after {} of {} sensors",
                    exchanges.len(),
                    sensors.len()
                );
            } else {
                log::trace!("Round {rounds} finished with {} exchanges", exchanges.len());
            }
            on_round(rounds, &exchanges);
        }
        rounds
    }

    fn poll_while<T, C>(&self, channel: &mut T, sensors: &[Sensor], keep_going: C) -> Vec<Exchange>
    where
        T: Read + Write + ?Sized,
        C: Fn() -> bool,
    {
        let mut exchanges = Vec::with_capacity(sensors.len());
        for sensor in sensors {
            if !keep_going() {
                log::debug!("Polling stopped before {sensor}");
                break;
            }
            exchanges.push(self.poll(channel, sensor));
        }
        exchanges
    }

    fn transfer<T>(
        &self,
        channel: &mut T,
        request: &RequestFrame,
        response_len: usize,
    ) -> io::Result<Vec<u8>>
    where
        T: Read + Write + ?Sized,
    {
        channel.write_all(request.as_ref())?;
        channel.flush()?;
        self.quiet_time();
        read_response(channel, response_len)
    }

    fn decode(&self, rx_buffer: &[u8], sensor: &Sensor) -> Result<Measurement> {
        if self.config.verify_address {
            proto::decode_from(rx_buffer, sensor)
        } else {
            proto::decode(rx_buffer, sensor.kind)
        }
    }

    fn quiet_time(&self) {
        if !self.config.inter_frame_delay.is_zero() {
            std::thread::sleep(self.config.inter_frame_delay);
        }
    }
}

/// Reads up to `expected` bytes.
///
/// A read timeout ends the response early and the short buffer is returned,
/// so the decoder reports it as a length fault. End of stream before the
/// first byte is an I/O error.
fn read_response<T>(channel: &mut T, expected: usize) -> io::Result<Vec<u8>>
where
    T: Read + ?Sized,
{
    let mut rx_buffer = vec![0u8; expected];
    let mut received = 0;
    while received < expected {
        match channel.read(&mut rx_buffer[received..]) {
            Ok(0) if received == 0 => {
                return Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "channel closed before any response byte",
                ));
            }
            Ok(0) => break,
            Ok(count) => received += count,
            Err(error) if error.kind() == io::ErrorKind::Interrupted => continue,
            Err(error) if error.kind() == io::ErrorKind::TimedOut => {
                log::trace!("Read timed out after {received} of {expected} bytes");
                break;
            }
            Err(error) => return Err(error),
        }
    }
    rx_buffer.truncate(received);
    Ok(rx_buffer)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::{crc, protocol::SensorKind};
    use assert_matches::assert_matches;
    use std::{collections::VecDeque, time::Instant};

    /// What the fake bus does after a request was written.
    #[derive(Debug, Clone)]
    pub(crate) enum Reply {
        Bytes(Vec<u8>),
        Silence,
        ReadError(io::ErrorKind),
        Closed,
        RejectWrite,
    }

    /// A scripted half-duplex channel: every written request consumes the next reply.
    #[derive(Debug, Default)]
    pub(crate) struct ScriptedChannel {
        pub written: Vec<Vec<u8>>,
        replies: VecDeque<Reply>,
        current: Option<Reply>,
        chunk: Option<usize>,
    }

    impl ScriptedChannel {
        pub fn new(replies: impl IntoIterator<Item = Reply>) -> Self {
            Self {
                replies: replies.into_iter().collect(),
                ..Default::default()
            }
        }

        fn chunked(mut self, chunk: usize) -> Self {
            self.chunk = Some(chunk);
            self
        }
    }

    impl Write for ScriptedChannel {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            let reply = self.replies.pop_front().unwrap_or(Reply::Silence);
            if let Reply::RejectWrite = reply {
                return Err(io::Error::new(io::ErrorKind::BrokenPipe, "port gone"));
            }
            self.written.push(buf.to_vec());
            self.current = Some(reply);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl Read for ScriptedChannel {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            match self.current.take() {
                Some(Reply::Bytes(mut bytes)) if !bytes.is_empty() => {
                    let count = bytes.len().min(buf.len()).min(self.chunk.unwrap_or(usize::MAX));
                    buf[..count].copy_from_slice(&bytes[..count]);
                    bytes.drain(..count);
                    self.current = Some(Reply::Bytes(bytes));
                    Ok(count)
                }
                Some(Reply::ReadError(kind)) => Err(kind.into()),
                Some(Reply::Closed) => Ok(0),
                _ => Err(io::ErrorKind::TimedOut.into()),
            }
        }
    }

    pub(crate) fn response(address: u8, registers: &[u16]) -> Vec<u8> {
        let mut frame = vec![address, 0x03, (registers.len() * 2) as u8];
        for register in registers {
            frame.extend_from_slice(&register.to_be_bytes());
        }
        let crc = crc::crc16(&frame);
        frame.extend_from_slice(&crc.to_le_bytes());
        frame
    }

    pub(crate) fn sensor(address: u8, kind: SensorKind) -> Sensor {
        Sensor::new(proto::Address::from(address), kind)
    }

    fn poller() -> SensorPoller {
        SensorPoller::new(PollerConfig {
            inter_frame_delay: Duration::ZERO,
            verify_address: false,
        })
    }

    #[test]
    fn poll_single_sensor() {
        let mut channel = ScriptedChannel::new([Reply::Bytes(response(0x01, &[0x01F4]))]);
        let exchange = poller().poll(&mut channel, &sensor(0x01, SensorKind::Ph));

        assert_eq!(
            channel.written,
            vec![vec![0x01, 0x03, 0x00, 0x00, 0x00, 0x01, 0x84, 0x0A]]
        );
        assert_eq!(exchange.response.len(), 7);
        assert_matches!(exchange.result, Ok(Measurement::Ph { ph }) if ph == 50.0);
    }

    #[test]
    fn response_arriving_in_pieces_is_reassembled() {
        let mut channel = ScriptedChannel::new([Reply::Bytes(response(
            0x02,
            &[300, 250, 1200, 80],
        ))])
        .chunked(3);
        let exchange = poller().poll(&mut channel, &sensor(0x02, SensorKind::Soil));
        assert!(exchange.is_ok());
        assert_eq!(exchange.response.len(), 13);
    }

    #[test]
    fn short_response_is_length_fault() {
        let mut truncated = response(0x01, &[0x01F4]);
        truncated.pop();
        let mut channel = ScriptedChannel::new([Reply::Bytes(truncated)]);
        let exchange = poller().poll(&mut channel, &sensor(0x01, SensorKind::Ph));
        assert_eq!(exchange.response.len(), 6);
        assert_matches!(
            exchange.result,
            Err(Error::Length {
                expected: 7,
                received: 6
            })
        );
    }

    #[test]
    fn silent_sensor_is_length_fault() {
        let mut channel = ScriptedChannel::new([Reply::Silence]);
        let exchange = poller().poll(&mut channel, &sensor(0x03, SensorKind::Leaf));
        assert!(exchange.response.is_empty());
        assert_matches!(
            exchange.result,
            Err(Error::Length {
                expected: 9,
                received: 0
            })
        );
    }

    #[test]
    fn channel_failures_are_io_faults() {
        let mut channel = ScriptedChannel::new([
            Reply::Closed,
            Reply::ReadError(io::ErrorKind::BrokenPipe),
            Reply::RejectWrite,
        ]);
        let poller = poller();
        let ph = sensor(0x07, SensorKind::Ph);

        let closed = poller.poll(&mut channel, &ph);
        assert_matches!(closed.result, Err(Error::Io(error)) if error.kind() == io::ErrorKind::UnexpectedEof);

        let broken = poller.poll(&mut channel, &ph);
        assert_matches!(broken.result, Err(Error::Io(error)) if error.kind() == io::ErrorKind::BrokenPipe);

        let rejected = poller.poll(&mut channel, &ph);
        assert_matches!(rejected.result, Err(Error::Io(error)) if error.kind() == io::ErrorKind::BrokenPipe);
        assert_eq!(channel.written.len(), 2);
    }

    #[test]
    fn corrupted_response_is_checksum_fault() {
        let mut corrupted = response(0x09, &[70]);
        corrupted[3] ^= 0x10;
        let mut channel = ScriptedChannel::new([Reply::Bytes(corrupted)]);
        let exchange = poller().poll(&mut channel, &sensor(0x09, SensorKind::Ph));
        assert_matches!(exchange.result, Err(Error::Checksum { .. }));
    }

    #[test]
    fn address_verification_is_opt_in() {
        let sensors = [sensor(0x08, SensorKind::Ph)];
        let reply = || Reply::Bytes(response(0x09, &[70]));

        let mut channel = ScriptedChannel::new([reply()]);
        let exchanges = poller().poll_all(&mut channel, &sensors);
        assert!(exchanges[0].is_ok());

        let strict = SensorPoller::new(PollerConfig {
            inter_frame_delay: Duration::ZERO,
            verify_address: true,
        });
        let mut channel = ScriptedChannel::new([reply()]);
        let exchanges = strict.poll_all(&mut channel, &sensors);
        assert_matches!(
            exchanges[0].result,
            Err(Error::AddressMismatch {
                expected: 8,
                received: 9
            })
        );
    }

    #[test]
    fn poll_all_keeps_order_and_continues_after_faults() {
        let sensors = [
            sensor(0x01, SensorKind::Soil),
            sensor(0x07, SensorKind::Ph),
            sensor(0x13, SensorKind::Leaf),
            sensor(0x08, SensorKind::Ph),
        ];
        let mut channel = ScriptedChannel::new([
            Reply::Bytes(response(0x01, &[300, 250, 1200, 80])),
            Reply::Silence,
            Reply::ReadError(io::ErrorKind::Other),
            Reply::Bytes(response(0x08, &[68])),
        ]);

        let exchanges = poller().poll_all(&mut channel, &sensors);

        assert_eq!(exchanges.len(), sensors.len());
        for (exchange, sensor) in exchanges.iter().zip(&sensors) {
            assert_eq!(&exchange.sensor, sensor);
            assert_eq!(exchange.request, sensor.request());
        }
        assert_matches!(exchanges[0].result, Ok(Measurement::Soil { .. }));
        assert_matches!(exchanges[1].result, Err(Error::Length { .. }));
        assert_matches!(exchanges[2].result, Err(Error::Io(_)));
        assert_matches!(exchanges[3].result, Ok(Measurement::Ph { ph }) if ph == 6.8);
        assert_eq!(channel.written.len(), 4);
    }

    #[test]
    fn poll_repeat_runs_until_cancelled() {
        let sensors = [sensor(0x07, SensorKind::Ph), sensor(0x08, SensorKind::Ph)];
        let mut channel = ScriptedChannel::new(
            (0..6).map(|_| Reply::Bytes(response(0x07, &[65]))),
        );
        let running = AtomicBool::new(true);
        let mut seen = Vec::new();

        let rounds = poller().poll_repeat(&mut channel, &sensors, &running, |round, exchanges| {
            seen.push((round, exchanges.len()));
            if round == 3 {
                running.store(false, Ordering::SeqCst);
            }
        });

        assert_eq!(rounds, 3);
        assert_eq!(seen, vec![(1, 2), (2, 2), (3, 2)]);
        assert_eq!(channel.written.len(), 6);
    }

    #[test]
    fn one_quiet_time_per_exchange() {
        let delay = Duration::from_millis(40);
        let poller = SensorPoller::new(PollerConfig {
            inter_frame_delay: delay,
            verify_address: false,
        });
        let sensors = [
            sensor(0x07, SensorKind::Ph),
            sensor(0x08, SensorKind::Ph),
            sensor(0x09, SensorKind::Ph),
        ];
        let mut channel = ScriptedChannel::new(
            [0x07, 0x08, 0x09].map(|address| Reply::Bytes(response(address, &[65]))),
        );

        let started = Instant::now();
        let exchanges = poller.poll_all(&mut channel, &sensors);
        let elapsed = started.elapsed();

        assert!(exchanges.iter().all(Exchange::is_ok));
        assert!(elapsed >= delay * 3, "elapsed {elapsed:?}");
        // A second wait between sensors would add two more delays.
        assert!(elapsed < delay * 5, "elapsed {elapsed:?}");
    }

    #[test]
    fn poll_repeat_reports_interrupted_round() {
        let sensors = [sensor(0x07, SensorKind::Ph), sensor(0x08, SensorKind::Ph)];
        let running = AtomicBool::new(true);
        let mut channel = ScriptedChannel::new([Reply::Bytes(response(0x07, &[65]))]);
        let mut seen = Vec::new();

        // Cancel while the first sensor of the first round is being polled.
        struct CancellingChannel<'a> {
            inner: &'a mut ScriptedChannel,
            running: &'a AtomicBool,
        }
        impl Write for CancellingChannel<'_> {
            fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
                self.running.store(false, Ordering::SeqCst);
                self.inner.write(buf)
            }
            fn flush(&mut self) -> io::Result<()> {
                self.inner.flush()
            }
        }
        impl Read for CancellingChannel<'_> {
            fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
                self.inner.read(buf)
            }
        }
        let mut cancelling = CancellingChannel {
            inner: &mut channel,
            running: &running,
        };

        let rounds = poller().poll_repeat(&mut cancelling, &sensors, &running, |round, exchanges| {
            seen.push((round, exchanges.len()));
        });

        assert_eq!(rounds, 1);
        assert_eq!(seen, vec![(1, 1)]);
        assert_eq!(channel.written.len(), 1);
    }

    #[test]
    fn poll_repeat_not_started_when_cancelled() {
        let mut channel = ScriptedChannel::default();
        let running = AtomicBool::new(false);
        let rounds = poller().poll_repeat(
            &mut channel,
            &[sensor(0x01, SensorKind::Soil)],
            &running,
            |_, _| panic!("no round expected"),
        );
        assert_eq!(rounds, 0);
        assert!(channel.written.is_empty());
    }
}

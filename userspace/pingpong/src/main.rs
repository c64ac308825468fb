/*
 * Producer/Consumer Demo over the Simulated NoC
 *
 * Two cores share one channel. The producer core fills its active staging
 * buffer and sends; the consumer core receives, checks and acknowledges.
 * Both run their loop bodies in turn on this thread, and the fabric clock
 * advances once per round, as the DMA engines would between two polls.
 *
 * Usage: mp-pingpong [messages] [buf_size] [num_buf] [-v]
 */

mod logger;

use log::LevelFilter;
use patmos_mp::noc::{Delivery, NocConfig, SimNoc};
use patmos_mp::{ChannelConfig, CoreId, SpmAddr, SpmLayout, TryAckError, TrySendError};

const PRODUCER: CoreId = CoreId(0);
const CONSUMER: CoreId = CoreId(1);

/// Demo parameters taken from the command line
struct Options {
    messages: u32,
    buf_size: usize,
    num_buf: usize,
    verbose: bool,
}

impl Options {
    fn parse() -> Result<Self, String> {
        let mut opts = Options {
            messages: 32,
            buf_size: 64,
            num_buf: 4,
            verbose: false,
        };
        let mut positional = 0;
        for arg in std::env::args().skip(1) {
            if arg == "-v" {
                opts.verbose = true;
                continue;
            }
            let value: usize = arg
                .parse()
                .map_err(|_| format!("invalid argument '{}'", arg))?;
            match positional {
                0 => opts.messages = value as u32,
                1 => opts.buf_size = value,
                2 => opts.num_buf = value,
                _ => return Err(format!("unexpected argument '{}'", arg)),
            }
            positional += 1;
        }
        if opts.buf_size < 4 {
            return Err("buf_size must hold at least one 32-bit tag".into());
        }
        Ok(opts)
    }
}

/// Retry counters of both cores
#[derive(Default)]
struct Stalls {
    no_capacity: u32,
    no_transport: u32,
    ack_retries: u32,
}

fn run(opts: &Options) -> Result<Stalls, String> {
    let noc = SimNoc::new(NocConfig {
        cores: 2,
        delivery: Delivery::Manual,
        ..NocConfig::default()
    })
    .map_err(|e| e.to_string())?;

    let size = noc.config().spm_size;
    let mut producer_spm = SpmLayout::new(SpmAddr::new(0), size).map_err(|e| e.to_string())?;
    let mut consumer_spm = SpmLayout::new(SpmAddr::new(0), size).map_err(|e| e.to_string())?;
    let channel = ChannelConfig::allocate(
        PRODUCER,
        CONSUMER,
        &mut producer_spm,
        &mut consumer_spm,
        opts.buf_size,
        opts.num_buf,
    )
    .map_err(|e| e.to_string())?;

    let mut tx = channel
        .send_end(noc.port(PRODUCER), noc.spm(PRODUCER))
        .map_err(|e| e.to_string())?;
    let mut rx = channel
        .recv_end(noc.port(CONSUMER), noc.spm(CONSUMER))
        .map_err(|e| e.to_string())?;

    log::info!(
        "channel {} -> {}: {} slots of {} bytes, {} + {} bytes of scratchpad",
        PRODUCER,
        CONSUMER,
        opts.num_buf,
        tx.common().buf_size(),
        tx.alloc_size(),
        rx.alloc_size()
    );

    let mut stalls = Stalls::default();
    let mut sent = 0u32;
    let mut received = 0u32;
    let mut unacked = 0u32;
    let hold = opts.num_buf.min(2) as u32;

    while received < opts.messages {
        // producer core
        if sent < opts.messages {
            if let Some(mut buf) = tx.try_write_buf() {
                buf.write_u32(0, sent);
            }
            match tx.try_send() {
                Ok(()) => sent += 1,
                Err(TrySendError::NoCapacity) => stalls.no_capacity += 1,
                Err(TrySendError::NoTransport) => stalls.no_transport += 1,
            }
        }

        // consumer core: hold up to two messages before acknowledging
        if let Ok(buf) = rx.try_recv() {
            let tag = buf.read_u32(0);
            if tag != received {
                return Err(format!("expected message {} but got {}", received, tag));
            }
            received += 1;
            unacked += 1;
        }
        if unacked >= hold || (unacked > 0 && received == opts.messages) {
            match rx.try_ack() {
                Ok(()) => unacked -= 1,
                Err(TryAckError::NoTransport) => stalls.ack_retries += 1,
            }
        }

        noc.tick();
    }

    // flush the remaining acknowledgments
    while unacked > 0 {
        rx.ack();
        unacked -= 1;
        noc.deliver_all();
    }
    noc.deliver_all();

    if tx.in_flight() != 0 {
        return Err(format!("{} messages still unacknowledged", tx.in_flight()));
    }
    Ok(stalls)
}

fn main() {
    let opts = match Options::parse() {
        Ok(opts) => opts,
        Err(err) => {
            eprintln!("mp-pingpong: {}", err);
            eprintln!("usage: mp-pingpong [messages] [buf_size] [num_buf] [-v]");
            std::process::exit(2);
        }
    };

    let level = if opts.verbose { LevelFilter::Trace } else { LevelFilter::Info };
    if let Err(err) = logger::init(level) {
        eprintln!("mp-pingpong: logger: {}", err);
    }

    match run(&opts) {
        Ok(stalls) => log::info!(
            "{} messages delivered in order; sender stalled {}x on capacity, {}x on DMA; {} ack retries",
            opts.messages,
            stalls.no_capacity,
            stalls.no_transport,
            stalls.ack_retries
        ),
        Err(err) => {
            log::error!("{}", err);
            std::process::exit(1);
        }
    }
}

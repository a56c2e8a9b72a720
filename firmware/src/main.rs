//! Transmitter firmware: board bring-up and the cooperative main loop.
//!
//! Interrupt priorities, low to high urgency: the DIO EXTI must outrank
//! nothing here but must run promptly — it performs the sync-word peek over
//! SPI — so the chip handle is shared with the loop behind a critical
//! section. SysTick only sets a flag.

#![no_std]
#![no_main]

mod sx1280;

use core::cell::RefCell;
use core::sync::atomic::{AtomicU32, Ordering};

use cortex_m::interrupt::{self as cs, Mutex};
use cortex_m::peripheral::syst::SystClkSource;
use cortex_m_rt::{entry, exception};
use defmt::{error, info};
use defmt_rtt as _;

#[cfg(feature = "dev-panic")]
use panic_probe as _;
#[cfg(feature = "prod-panic")]
use panic_reset as _;

use stm32_hal2::{
    clocks::Clocks,
    gpio::{self, Edge, OutputType, Pin, PinMode, Port},
    pac,
    pac::interrupt,
    spi::{BaudRate, Spi, SpiConfig},
    usart::{Usart, UsartConfig},
};

use hoplink::{
    Antenna, ChannelOrder, IrqLatch, LinkConfig, LinkEngine, NoChannelSource, RadioPort,
    SerialLinkMode, SerialPort, SysTickFlag,
};

use sx1280::Sx1280;

/// Bind value; both link sides derive the sync word and hop seed from it.
const BIND_VALUE: u32 = 0x4C52_0001;

const fn sync_word_from_bind(bind: u32) -> u16 {
    ((bind >> 16) ^ bind) as u16
}

const FRAME_SYNC_WORD: u16 = sync_word_from_bind(BIND_VALUE);

static SYS_TICK: SysTickFlag = SysTickFlag::new();
static MILLIS: AtomicU32 = AtomicU32::new(0);

static DIO1_LATCH: IrqLatch = IrqLatch::new();

/// The transceiver, shared between the DIO handler and the main loop.
static RADIO1: Mutex<RefCell<Option<Sx1280>>> = Mutex::new(RefCell::new(None));

/// Zero-sized handle the engine drives the shared transceiver through.
///
/// Every access takes a critical section, so a bus transaction started in
/// the loop finishes before the DIO handler's sync-word peek begins.
struct Radio1;

impl hoplink::RadioDriver for Radio1 {
    fn init(&mut self) {
        cs::free(|cs| {
            if let Some(radio) = RADIO1.borrow(cs).borrow_mut().as_mut() {
                radio.init();
            }
        });
    }

    fn is_ok(&mut self) -> bool {
        cs::free(|cs| match RADIO1.borrow(cs).borrow_mut().as_mut() {
            Some(radio) => radio.is_ok(),
            None => false,
        })
    }

    fn start_up(&mut self) {
        cs::free(|cs| {
            if let Some(radio) = RADIO1.borrow(cs).borrow_mut().as_mut() {
                radio.start_up();
            }
        });
    }

    fn set_rf_frequency(&mut self, freq_hz: u32) {
        cs::free(|cs| {
            if let Some(radio) = RADIO1.borrow(cs).borrow_mut().as_mut() {
                radio.set_rf_frequency(freq_hz);
            }
        });
    }

    fn send_frame(&mut self, frame: &[u8], tmo_us: u16) {
        cs::free(|cs| {
            if let Some(radio) = RADIO1.borrow(cs).borrow_mut().as_mut() {
                radio.send_frame(frame, tmo_us);
            }
        });
    }

    fn set_to_rx(&mut self, tmo_us: u16) {
        cs::free(|cs| {
            if let Some(radio) = RADIO1.borrow(cs).borrow_mut().as_mut() {
                radio.set_to_rx(tmo_us);
            }
        });
    }

    fn read_frame(&mut self, frame: &mut [u8]) {
        cs::free(|cs| {
            if let Some(radio) = RADIO1.borrow(cs).borrow_mut().as_mut() {
                radio.read_frame(frame);
            }
        });
    }

    fn read_buffer(&mut self, offset: u8, dst: &mut [u8]) {
        cs::free(|cs| {
            if let Some(radio) = RADIO1.borrow(cs).borrow_mut().as_mut() {
                radio.read_buffer(offset, dst);
            }
        });
    }

    fn get_packet_status(&mut self) -> hoplink::PacketStatus {
        cs::free(|cs| match RADIO1.borrow(cs).borrow_mut().as_mut() {
            Some(radio) => radio.get_packet_status(),
            None => hoplink::PacketStatus::default(),
        })
    }

    fn get_and_clear_irq_status(&mut self, mask: hoplink::IrqMask) -> hoplink::IrqMask {
        cs::free(|cs| match RADIO1.borrow(cs).borrow_mut().as_mut() {
            Some(radio) => radio.get_and_clear_irq_status(mask),
            None => hoplink::IrqMask::NONE,
        })
    }
}

/// Non-blocking serial port over USART2; overflow drops bytes rather than
/// stalling the loop.
struct UartPort {
    uart: Usart<pac::USART2>,
}

impl SerialPort for UartPort {
    fn available(&self) -> bool {
        self.uart.regs.isr.read().rxne().bit_is_set()
    }

    fn get(&mut self) -> Option<u8> {
        if self.available() {
            Some(self.uart.regs.rdr.read().rdr().bits() as u8)
        } else {
            None
        }
    }

    fn put(&mut self, c: u8) {
        if self.uart.regs.isr.read().txe().bit_is_set() {
            self.uart.regs.tdr.write(|w| unsafe { w.tdr().bits(c.into()) });
        }
    }

    fn flush(&mut self) {
        while self.get().is_some() {}
    }
}

#[entry]
fn main() -> ! {
    let mut cp = cortex_m::Peripherals::take().unwrap();
    let dp = pac::Peripherals::take().unwrap();

    let clock_cfg = Clocks::default();
    if clock_cfg.setup().is_err() {
        // Clock trouble this early leaves only the internal oscillator and
        // a blink loop.
        fatal_cadence(25);
    }

    info!("hoplink tx starting");

    // 1 kHz SysTick.
    cp.SYST.set_clock_source(SystClkSource::Core);
    cp.SYST.set_reload(clock_cfg.systick() / 1_000 - 1);
    cp.SYST.clear_current();
    cp.SYST.enable_counter();
    cp.SYST.enable_interrupt();

    // SPI1 to the transceiver.
    let _sck = Pin::new(Port::A, 5, PinMode::Alt(5));
    let _miso = Pin::new(Port::A, 6, PinMode::Alt(5));
    let _mosi = Pin::new(Port::A, 7, PinMode::Alt(5));
    let mut cs_pin = Pin::new(Port::A, 4, PinMode::Output);
    cs_pin.set_high();

    let busy = Pin::new(Port::B, 0, PinMode::Input);
    let mut reset = Pin::new(Port::B, 1, PinMode::Output);
    reset.set_high();

    let spi = Spi::new(dp.SPI1, SpiConfig::default(), BaudRate::Div8);

    // DIO1 interrupt line.
    let mut dio1 = Pin::new(Port::B, 4, PinMode::Input);
    dio1.enable_interrupt(Edge::Rising);
    unsafe {
        cortex_m::peripheral::NVIC::unmask(pac::Interrupt::EXTI4);
    }

    cs::free(|cs| {
        RADIO1
            .borrow(cs)
            .borrow_mut()
            .replace(Sx1280::new(spi, cs_pin, busy, reset, 13));
    });

    // Status LED.
    let mut led = Pin::new(Port::C, 6, PinMode::Output);
    led.output_type(OutputType::PushPull);

    // Serial bridge on USART2.
    let uart = Usart::new(dp.USART2, 115_200, UsartConfig::default(), &clock_cfg);
    let _uart_tx = Pin::new(Port::A, 2, PinMode::Alt(7));
    let _uart_rx = Pin::new(Port::A, 3, PinMode::Alt(7));
    let serial = UartPort { uart };

    let cfg = LinkConfig {
        fhss_num: 24,
        fhss_seed: BIND_VALUE,
        frame_sync_word: FRAME_SYNC_WORD,
        lq_averaging_period: 100,
        frame_rate_ms: 20,
        frame_rate_hz: 50,
        connect_tmo_systicks: 500,
        connect_sync_cnt: 5,
        diversity: hoplink::Diversity::Antenna1,
        channel_order: ChannelOrder::Aetr,
        serial_link_mode: SerialLinkMode::Transparent,
        timeout_aborts_both: true,
        halt_on_impossible_irq: true,
    };

    let port1 = RadioPort::new(Antenna::One, Radio1, &DIO1_LATCH);

    // Stick data arrives through a host-transmitter bridge; none is wired
    // on this board revision.
    let channels = NoChannelSource;

    let mut engine = match LinkEngine::new(cfg, Some(port1), None, serial, channels, &SYS_TICK) {
        Ok(engine) => engine,
        Err(e) => {
            error!("bad link config: {:?}", e);
            fatal_cadence(100);
        }
    };

    if engine.start().is_err() {
        error!("radio did not come up");
        fatal_cadence(25);
    }

    info!("link engine running, sync word {=u16:x}", FRAME_SYNC_WORD);

    let mut led_toggle_at = 0u32;
    loop {
        if engine.poll().is_err() {
            // Chip and engine state diverged; that must be visible on the
            // bench.
            error!("link fault");
            fatal_cadence(50);
        }

        if engine.take_store_params_request() {
            // Parameter persistence hook; flash storage hangs off here.
            info!("store params requested");
        }

        // Slow green-ish blink when connected, fast when searching.
        let now = MILLIS.load(Ordering::Relaxed);
        let blink_ms = if engine.is_connected() { 500 } else { 200 };
        if now.wrapping_sub(led_toggle_at) >= blink_ms {
            led_toggle_at = now;
            led.toggle();
        }
    }
}

#[exception]
fn SysTick() {
    SYS_TICK.set();
    MILLIS.fetch_add(1, Ordering::Relaxed);
}

/// DIO1 of the transceiver: latch the IRQ status, peeking the sync word on
/// RX_DONE so foreign frames vanish before the loop ever sees them.
#[interrupt]
fn EXTI4() {
    gpio::clear_exti_interrupt(4);
    cs::free(|cs| {
        if let Some(radio) = RADIO1.borrow(cs).borrow_mut().as_mut() {
            DIO1_LATCH.latch(radio, FRAME_SYNC_WORD);
        }
    });
}

/// Dead end with a distinctive blink period.
fn fatal_cadence(period_ms: u32) -> ! {
    let mut led = Pin::new(Port::C, 6, PinMode::Output);
    loop {
        led.toggle();
        cortex_m::asm::delay(170_000 * period_ms);
    }
}

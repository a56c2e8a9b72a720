//! SX1280-class 2.4 GHz transceiver over SPI.
//!
//! Command-level wrapper implementing the link engine's `RadioDriver`
//! contract. LoRa modulation, fixed-length packets sized to the air frame,
//! hardware CRC off (the frame carries its own), DIO1 wired to
//! TX_DONE | RX_DONE | RX_TX_TIMEOUT.
//!
//! The busy line gates every command; per the datasheet the chip must not
//! be addressed while busy is high.

use stm32_hal2::gpio::Pin;
use stm32_hal2::pac::SPI1;
use stm32_hal2::spi::Spi;

use hoplink::{IrqMask, PacketStatus, RadioDriver};
use hoplink_proto::FRAME_LEN;

// Opcodes (full table; not all are exercised).
#[allow(dead_code)]
const OP_GET_STATUS: u8 = 0xC0;
#[allow(dead_code)]
const OP_WRITE_REGISTER: u8 = 0x18;
const OP_READ_REGISTER: u8 = 0x19;
const OP_WRITE_BUFFER: u8 = 0x1A;
const OP_READ_BUFFER: u8 = 0x1B;
#[allow(dead_code)]
const OP_SET_SLEEP: u8 = 0x84;
const OP_SET_STANDBY: u8 = 0x80;
const OP_SET_FS: u8 = 0xC1;
const OP_SET_TX: u8 = 0x83;
const OP_SET_RX: u8 = 0x82;
const OP_SET_PACKET_TYPE: u8 = 0x8A;
const OP_SET_RF_FREQUENCY: u8 = 0x86;
const OP_SET_TX_PARAMS: u8 = 0x8E;
const OP_SET_BUFFER_BASE_ADDRESS: u8 = 0x8F;
const OP_SET_MODULATION_PARAMS: u8 = 0x8B;
const OP_SET_PACKET_PARAMS: u8 = 0x8C;
const OP_GET_PACKET_STATUS: u8 = 0x1D;
const OP_SET_DIO_IRQ_PARAMS: u8 = 0x8D;
const OP_GET_IRQ_STATUS: u8 = 0x15;
const OP_CLR_IRQ_STATUS: u8 = 0x97;
const OP_SET_AUTO_FS: u8 = 0x9E;

// Chip-level IRQ bits (16-bit IRQ register).
const CHIP_IRQ_TX_DONE: u16 = 1 << 0;
const CHIP_IRQ_RX_DONE: u16 = 1 << 1;
const CHIP_IRQ_RX_TX_TIMEOUT: u16 = 1 << 14;
const CHIP_IRQ_ALL: u16 = 0xFFFF;

const PACKET_TYPE_LORA: u8 = 0x01;

// LoRa SF7 / BW 800 kHz / CR 4/5 LI.
const LORA_SF7: u8 = 0x70;
const LORA_BW_800: u8 = 0x18;
const LORA_CR_LI_4_5: u8 = 0x05;
const LORA_HEADER_DISABLE: u8 = 0x80;
const LORA_CRC_DISABLE: u8 = 0x00;
const LORA_IQ_NORMAL: u8 = 0x40;
const LORA_PREAMBLE_12: u8 = 12;

const RAMP_04_US: u8 = 0x20;

// SetTx/SetRx period base: 62.5 us steps.
const PERIODBASE_62P5_US: u8 = 0x01;

// PLL step: 52 MHz / 2^18.
const PLL_STEP_SHIFT: u32 = 18;
const XTAL_FREQ_HZ: u64 = 52_000_000;

const FIRMWARE_VERSION_REG: u16 = 0x0153;

/// One SX1280 on its own SPI bus with chip-select, busy and reset lines.
pub struct Sx1280 {
    spi: Spi<SPI1>,
    cs: Pin,
    busy: Pin,
    reset: Pin,
    tx_power: u8,
}

impl Sx1280 {
    pub fn new(spi: Spi<SPI1>, cs: Pin, busy: Pin, reset: Pin, tx_power: u8) -> Self {
        Self {
            spi,
            cs,
            busy,
            reset,
            tx_power,
        }
    }

    fn wait_on_busy(&self) {
        while self.busy.is_high() {
            cortex_m::asm::nop();
        }
    }

    fn command(&mut self, out: &[u8]) {
        self.wait_on_busy();
        self.cs.set_low();
        let _ = self.spi.write(out);
        self.cs.set_high();
    }

    fn command_read(&mut self, buf: &mut [u8]) {
        self.wait_on_busy();
        self.cs.set_low();
        let _ = self.spi.transfer(buf);
        self.cs.set_high();
    }

    fn read_register_u16(&mut self, addr: u16) -> u16 {
        let mut buf = [
            OP_READ_REGISTER,
            (addr >> 8) as u8,
            addr as u8,
            0, // NOP while the chip turns around
            0,
            0,
        ];
        self.command_read(&mut buf);
        u16::from_be_bytes([buf[4], buf[5]])
    }

    fn hard_reset(&mut self) {
        self.reset.set_low();
        delay_ms(5);
        self.reset.set_high();
        delay_ms(50);
        self.wait_on_busy();
    }

    fn clear_chip_irq(&mut self, mask: u16) {
        self.command(&[OP_CLR_IRQ_STATUS, (mask >> 8) as u8, mask as u8]);
    }

    fn configure(&mut self) {
        self.command(&[OP_SET_PACKET_TYPE, PACKET_TYPE_LORA]);
        self.command(&[OP_SET_BUFFER_BASE_ADDRESS, 0, 0]);
        self.command(&[OP_SET_AUTO_FS, 1]);
        self.command(&[OP_SET_MODULATION_PARAMS, LORA_SF7, LORA_BW_800, LORA_CR_LI_4_5]);
        self.command(&[
            OP_SET_PACKET_PARAMS,
            LORA_PREAMBLE_12,
            LORA_HEADER_DISABLE,
            FRAME_LEN as u8,
            LORA_CRC_DISABLE,
            LORA_IQ_NORMAL,
            0,
            0,
        ]);
        self.command(&[OP_SET_TX_PARAMS, self.tx_power, RAMP_04_US]);
        // DIO1 <- TX_DONE | RX_DONE | RX_TX_TIMEOUT, DIO2/DIO3 unused.
        let dio1 = CHIP_IRQ_TX_DONE | CHIP_IRQ_RX_DONE | CHIP_IRQ_RX_TX_TIMEOUT;
        self.command(&[
            OP_SET_DIO_IRQ_PARAMS,
            (CHIP_IRQ_ALL >> 8) as u8,
            CHIP_IRQ_ALL as u8,
            (dio1 >> 8) as u8,
            dio1 as u8,
            0,
            0,
            0,
            0,
        ]);
        self.clear_chip_irq(CHIP_IRQ_ALL);
        self.command(&[OP_SET_FS]);
    }
}

impl RadioDriver for Sx1280 {
    fn init(&mut self) {
        // Boot time is unspecified; give it slack, then reset.
        delay_ms(300);
        self.hard_reset();
    }

    fn is_ok(&mut self) -> bool {
        let version = self.read_register_u16(FIRMWARE_VERSION_REG);
        version != 0 && version != 0xFFFF
    }

    fn start_up(&mut self) {
        self.command(&[OP_SET_STANDBY, 0]); // STDBY_RC
        delay_ms(1);
        self.configure();
    }

    fn set_rf_frequency(&mut self, freq_hz: u32) {
        let steps = ((u64::from(freq_hz) << PLL_STEP_SHIFT) / XTAL_FREQ_HZ) as u32;
        self.command(&[
            OP_SET_RF_FREQUENCY,
            (steps >> 16) as u8,
            (steps >> 8) as u8,
            steps as u8,
        ]);
    }

    fn send_frame(&mut self, frame: &[u8], tmo_us: u16) {
        let mut buf = [0u8; 2 + FRAME_LEN];
        buf[0] = OP_WRITE_BUFFER;
        buf[1] = 0; // offset
        buf[2..2 + frame.len()].copy_from_slice(frame);
        self.command(&buf[..2 + frame.len()]);

        self.clear_chip_irq(CHIP_IRQ_ALL);
        let periods = tmo_us / 62; // 62.5 us period base
        self.command(&[
            OP_SET_TX,
            PERIODBASE_62P5_US,
            (periods >> 8) as u8,
            periods as u8,
        ]);
    }

    fn set_to_rx(&mut self, tmo_us: u16) {
        self.clear_chip_irq(CHIP_IRQ_ALL);
        let periods = tmo_us / 62;
        self.command(&[
            OP_SET_RX,
            PERIODBASE_62P5_US,
            (periods >> 8) as u8,
            periods as u8,
        ]);
    }

    fn read_frame(&mut self, frame: &mut [u8]) {
        self.read_buffer(0, frame);
    }

    fn read_buffer(&mut self, offset: u8, dst: &mut [u8]) {
        let mut buf = [0u8; 3 + FRAME_LEN];
        buf[0] = OP_READ_BUFFER;
        buf[1] = offset;
        // buf[2] is the turnaround NOP
        let total = 3 + dst.len();
        self.command_read(&mut buf[..total]);
        dst.copy_from_slice(&buf[3..total]);
    }

    fn get_packet_status(&mut self) -> PacketStatus {
        let mut buf = [OP_GET_PACKET_STATUS, 0, 0, 0, 0, 0, 0];
        self.command_read(&mut buf);
        // LoRa layout: rssiSync at [2], snr at [3].
        let rssi = -((buf[2] / 2) as i8);
        let snr = (buf[3] as i8) / 4;
        PacketStatus { rssi, snr }
    }

    fn get_and_clear_irq_status(&mut self, mask: IrqMask) -> IrqMask {
        let mut buf = [OP_GET_IRQ_STATUS, 0, 0, 0];
        self.command_read(&mut buf);
        let chip = u16::from_be_bytes([buf[2], buf[3]]);

        let mut irq = IrqMask::NONE;
        if chip & CHIP_IRQ_TX_DONE != 0 {
            irq |= IrqMask::TX_DONE;
        }
        if chip & CHIP_IRQ_RX_DONE != 0 {
            irq |= IrqMask::RX_DONE;
        }
        if chip & CHIP_IRQ_RX_TX_TIMEOUT != 0 {
            irq |= IrqMask::TIMEOUT;
        }
        self.clear_chip_irq(chip);

        irq & mask
    }
}

/// Crude boot-time delay; only used before the tick is running.
fn delay_ms(ms: u32) {
    // 170 MHz core clock.
    cortex_m::asm::delay(170_000 * ms);
}

//! Ready-made emulated devices
//!
//! Control names and default values follow the USB audio interface driver
//! conventions the core expects. The 4th-gen 4i4 exercises every feature:
//! full routing, an 8-column mixer, DSP channels and monitor groups. The
//! 3rd-gen Solo is the small firmware case where the driver itself manages
//! the output stereo link.

use crate::emulated::EmulatedDevice;

const GEN4_SOURCES: &[&str] = &[
    "Off",
    "Analogue 1",
    "Analogue 2",
    "Analogue 3",
    "Analogue 4",
    "S/PDIF 1",
    "S/PDIF 2",
    "PCM 1",
    "PCM 2",
    "PCM 3",
    "PCM 4",
    "Mix A",
    "Mix B",
    "Mix C",
    "Mix D",
    "DSP 1",
    "DSP 2",
];

const MONITOR_SOURCES: &[&str] = &["Mix A", "Mix B", "Analogue 1", "Analogue 2"];

const GAIN_UNITY: i64 = 300;
const GAIN_MAX: i64 = 350;

/// 4th-gen 4i4: 4 analogue ins and outs, S/PDIF, 4 PCM channels, a 4x8
/// mixer and a DSP pair. Outputs 3-4 monitor Mix C-D out of the box.
pub fn gen4_4i4() -> EmulatedDevice {
    let mut dev = EmulatedDevice::new("S1A4X7000001", "Scarlett 4i4 4th Gen");

    // routing selectors; the item list defines the source table
    let outs = [
        ("Analogue Output 1 Playback Enum", 0u32),
        ("Analogue Output 2 Playback Enum", 0),
        ("Analogue Output 3 Playback Enum", 13), // Mix C
        ("Analogue Output 4 Playback Enum", 14), // Mix D
        ("S/PDIF Output 1 Playback Enum", 0),
        ("S/PDIF Output 2 Playback Enum", 0),
    ];
    for (name, value) in outs {
        dev.add_enum(name, value, GEN4_SOURCES);
    }
    for n in 1..=8u32 {
        // the first four mixer columns listen to the host
        let value = if n <= 4 { 6 + n } else { 0 };
        dev.add_enum(&format!("Mixer Input {n:02} Capture Enum"), value, GEN4_SOURCES);
    }
    dev.add_enum("DSP Input 1 Capture Enum", 0, GEN4_SOURCES);
    dev.add_enum("DSP Input 2 Capture Enum", 0, GEN4_SOURCES);
    for n in 1..=4u32 {
        // capture channels listen to the mixes
        dev.add_enum(&format!("PCM {n} Capture Enum"), 10 + n, GEN4_SOURCES);
    }

    // gain matrix, unity on the diagonal
    for m in 0..4u32 {
        let letter = char::from(b'A' + m as u8);
        for c in 0..8u32 {
            let value = if m == c { GAIN_UNITY } else { 0 };
            dev.add_int(
                &format!("Mix {letter} Input {:02} Playback Volume", c + 1),
                value,
                0,
                GAIN_MAX,
            );
        }
    }

    // monitor groups on the analogue outputs
    for n in 1..=4u32 {
        dev.add_bool(&format!("Monitor Output {n} Main Switch"), false);
        dev.add_bool(&format!("Monitor Output {n} Alt Switch"), false);
        dev.add_enum(
            &format!("Monitor Output {n} Source Playback Enum"),
            0,
            MONITOR_SOURCES,
        );
        dev.add_int(&format!("Monitor Output {n} Trim Volume"), 0, -66, 0);
    }
    dev.set_monitor_targets(vec![11, 12, 1, 2]);

    dev
}

/// 3rd-gen Solo: two channels each way and a driver-managed stereo link on
/// the output pair.
pub fn gen3_solo() -> EmulatedDevice {
    let mut dev = EmulatedDevice::new("S0L0X3000001", "Scarlett Solo 3rd Gen");

    let sources = &["Off", "Analogue 1", "Analogue 2", "PCM 1", "PCM 2", "Mix A", "Mix B"];
    dev.add_enum("Analogue Output 1 Playback Enum", 0, sources);
    dev.add_enum("Analogue Output 2 Playback Enum", 0, sources);
    dev.add_enum("Mixer Input 01 Capture Enum", 0, sources);
    dev.add_enum("Mixer Input 02 Capture Enum", 0, sources);
    dev.add_enum("PCM 1 Capture Enum", 0, sources);
    dev.add_enum("PCM 2 Capture Enum", 0, sources);

    for m in 0..2u32 {
        let letter = char::from(b'A' + m as u8);
        for c in 0..2u32 {
            let value = if m == c { GAIN_UNITY } else { 0 };
            dev.add_int(
                &format!("Mix {letter} Input {:02} Playback Volume", c + 1),
                value,
                0,
                GAIN_MAX,
            );
        }
    }

    dev.add_bool("Analogue Output 1-2 Stereo Link Switch", true);

    dev
}

//! Purpose: Render a collected `Inventory` for humans or machines.
//! Exports: `render_text`, `inventory_json`.
//! Role: Pure formatting over already-fetched records; performs no PKCS#11 calls.
//! Invariants: Text layout follows the classic token/slot dump (tab-indented, hex flags).
//! Invariants: JSON output is the serde form of `Inventory`; fields are additive-only.
use std::fmt::Write as _;

use serde_json::Value;

use crate::core::pkcs11::{Inventory, QueryFailure, SlotInfo, SlotReport, TokenInfo};

pub fn inventory_json(inventory: &Inventory) -> Value {
    serde_json::to_value(inventory).unwrap_or_else(|err| {
        serde_json::json!({ "error": { "kind": "Internal", "message": err.to_string() } })
    })
}

pub fn render_text(inventory: &Inventory) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "Module: {}", inventory.module.display());
    if let Some(library) = &inventory.library {
        let _ = writeln!(
            out,
            "Library: {} {} (Cryptoki {}, {})",
            library.description,
            library.library_version,
            library.cryptoki_version,
            library.manufacturer
        );
    }
    if inventory.slots.is_empty() {
        out.push_str("No slots found\n");
    }
    for slot in &inventory.slots {
        write_slot(&mut out, slot);
    }
    out
}

fn write_slot(out: &mut String, report: &SlotReport) {
    for failure in &report.failures {
        write_failure(out, failure);
    }
    match &report.token {
        Some(token) => {
            let _ = writeln!(out, "Token {:#x} Info:", report.id);
            write_token(out, token);
        }
        None if report.failures.is_empty() => {
            let _ = writeln!(out, "Token {:#x}: not present", report.id);
        }
        None => {}
    }
    if let Some(slot) = &report.slot {
        let _ = writeln!(out, "Slot {:#x} Info", report.id);
        write_slot_info(out, slot);
    }
}

fn write_failure(out: &mut String, failure: &QueryFailure) {
    let what = match failure.call.as_str() {
        "C_GetTokenInfo" => "token info".to_string(),
        "C_GetSlotInfo" => "the slot info".to_string(),
        other => format!("{other} result"),
    };
    match failure.rv {
        Some(rv) => {
            let _ = writeln!(out, "Error getting {what}: {rv:#X}");
        }
        None => {
            let _ = writeln!(out, "Error getting {what}: {}", failure.message);
        }
    }
}

fn write_slot_info(out: &mut String, slot: &SlotInfo) {
    let _ = writeln!(out, "\tDescription: {}", slot.description);
    let _ = writeln!(out, "\tManufacturer: {}", slot.manufacturer);
    let _ = writeln!(out, "\tFlags: {:#X}", slot.flags);
    let _ = writeln!(out, "\tHardware Version: {}", slot.hardware_version);
    let _ = writeln!(out, "\tFirmware Version: {}", slot.firmware_version);
}

fn write_token(out: &mut String, token: &TokenInfo) {
    let _ = writeln!(out, "\tLabel: {}", token.label);
    let _ = writeln!(out, "\tManufacturer: {}", token.manufacturer);
    let _ = writeln!(out, "\tModel: {}", token.model);
    let _ = writeln!(out, "\tSerial Number: {}", token.serial_number);
    let _ = writeln!(out, "\tFlags: {:#X}", token.flags);
    let _ = writeln!(
        out,
        "\tSessions: {}/{}",
        token.session_count, token.max_session_count
    );
    let _ = writeln!(
        out,
        "\tR/W Sessions: {}/{}",
        token.rw_session_count, token.max_rw_session_count
    );
    let _ = writeln!(
        out,
        "\tPIN Length: {}-{}",
        token.min_pin_len, token.max_pin_len
    );
    let _ = writeln!(
        out,
        "\tPublic Memory: {:#X}/{:#X}",
        token.free_public_memory, token.total_public_memory
    );
    let _ = writeln!(
        out,
        "\tPrivate Memory: {:#X}/{:#X}",
        token.free_private_memory, token.total_private_memory
    );
    let _ = writeln!(out, "\tHardware Version: {}", token.hardware_version);
    let _ = writeln!(out, "\tFirmware Version: {}", token.firmware_version);
    let _ = writeln!(out, "\tTime: {}", token.utc_time);
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::{inventory_json, render_text};
    use crate::core::pkcs11::{
        Inventory, LibraryInfo, QueryFailure, SlotInfo, SlotReport, TokenInfo, Version,
    };

    fn slot_info() -> SlotInfo {
        SlotInfo {
            description: "Acme Reader".to_string(),
            manufacturer: "Acme".to_string(),
            flags: 0x7,
            hardware_version: Version { major: 1, minor: 0 },
            firmware_version: Version { major: 0, minor: 9 },
        }
    }

    fn token_info() -> TokenInfo {
        TokenInfo {
            label: "acme-token".to_string(),
            manufacturer: "Acme".to_string(),
            model: "A1".to_string(),
            serial_number: "42".to_string(),
            flags: 0x40d,
            session_count: 1,
            max_session_count: 10,
            rw_session_count: 0,
            max_rw_session_count: 5,
            min_pin_len: 4,
            max_pin_len: 8,
            free_public_memory: 0x800,
            total_public_memory: 0x1000,
            free_private_memory: 0x100,
            total_private_memory: 0x200,
            hardware_version: Version { major: 1, minor: 2 },
            firmware_version: Version { major: 3, minor: 4 },
            utc_time: String::new(),
        }
    }

    fn sample() -> Inventory {
        Inventory {
            module: PathBuf::from("/opt/p11/libacme.so"),
            library: Some(LibraryInfo {
                cryptoki_version: Version { major: 2, minor: 40 },
                manufacturer: "Acme".to_string(),
                flags: 0,
                description: "Acme soft token".to_string(),
                library_version: Version { major: 3, minor: 1 },
            }),
            slots: vec![
                SlotReport {
                    id: 1,
                    slot: Some(slot_info()),
                    token: Some(token_info()),
                    failures: Vec::new(),
                },
                SlotReport {
                    id: 2,
                    slot: Some(slot_info()),
                    token: None,
                    failures: Vec::new(),
                },
                SlotReport {
                    id: 3,
                    slot: None,
                    token: None,
                    failures: vec![QueryFailure {
                        call: "C_GetSlotInfo".to_string(),
                        rv: Some(0x3),
                        message: "C_GetSlotInfo failed: CKR_SLOT_ID_INVALID".to_string(),
                    }],
                },
            ],
        }
    }

    #[test]
    fn text_follows_token_then_slot_layout() {
        let text = render_text(&sample());
        let lines: Vec<&str> = text.lines().collect();

        assert_eq!(lines[0], "Module: /opt/p11/libacme.so");
        assert_eq!(lines[1], "Library: Acme soft token 3.1 (Cryptoki 2.40, Acme)");
        assert_eq!(lines[2], "Token 0x1 Info:");
        assert_eq!(lines[3], "\tLabel: acme-token");
        assert!(lines.contains(&"\tSessions: 1/10"));
        assert!(lines.contains(&"\tPIN Length: 4-8"));
        assert!(lines.contains(&"\tPublic Memory: 0x800/0x1000"));
        assert!(lines.contains(&"\tFlags: 0x40D"));
        assert!(lines.contains(&"Slot 0x1 Info"));
        assert!(lines.contains(&"Token 0x2: not present"));
        assert!(lines.contains(&"Error getting the slot info: 0x3"));
        assert!(!lines.contains(&"Slot 0x3 Info"));
    }

    #[test]
    fn text_reports_empty_slot_list() {
        let inventory = Inventory {
            module: PathBuf::from("/opt/p11/libacme.so"),
            library: None,
            slots: Vec::new(),
        };
        assert_eq!(
            render_text(&inventory),
            "Module: /opt/p11/libacme.so\nNo slots found\n"
        );
    }

    #[test]
    fn json_skips_absent_fields() {
        let value = inventory_json(&sample());

        assert_eq!(value["module"], "/opt/p11/libacme.so");
        assert_eq!(value["library"]["cryptoki_version"]["minor"], 40);
        let slots = value["slots"].as_array().expect("slots");
        assert_eq!(slots.len(), 3);
        assert_eq!(slots[0]["token"]["label"], "acme-token");
        assert!(slots[0].get("failures").is_none());
        assert!(slots[1].get("token").is_none());
        assert_eq!(slots[2]["failures"][0]["call"], "C_GetSlotInfo");
        assert_eq!(slots[2]["failures"][0]["rv"], 3);
    }
}

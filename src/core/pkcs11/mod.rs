//! Purpose: Safe, read-only queries against a resolved PKCS#11 function table.
//! Exports: `Cryptoki`, `inventory`, record types (`LibraryInfo`, `SlotInfo`, `TokenInfo`, ...), `rv_name`.
//! Role: Downstream consumer of `Probe::function_list`; never loads or unloads modules itself.
//! Invariants: All FFI interaction is confined to this module + `sys`.
//! Invariants: `Cryptoki` borrows the table, so finalization precedes module teardown.
//! Invariants: A missing table entry is a `Provider` error, never a null call.
use std::path::{Path, PathBuf};
use std::ptr;

use serde::Serialize;
use tracing::{debug, warn};

use crate::core::error::{Error, ErrorKind};

pub mod sys;

use sys::{
    CK_FALSE, CK_TRUE, CKR_ARGUMENTS_BAD, CKR_BUFFER_TOO_SMALL, CKR_CRYPTOKI_ALREADY_INITIALIZED,
    CKR_CRYPTOKI_NOT_INITIALIZED, CKR_DEVICE_ERROR, CKR_DEVICE_REMOVED, CKR_FUNCTION_FAILED,
    CKR_FUNCTION_NOT_SUPPORTED, CKR_GENERAL_ERROR, CKR_HOST_MEMORY, CKR_OK, CKR_SLOT_ID_INVALID,
    CKR_TOKEN_NOT_PRESENT, CKR_TOKEN_NOT_RECOGNIZED, CkFunctionList, CkInfo, CkRv, CkSlotId,
    CkSlotInfo, CkTokenInfo, CkUlong, CkVersion,
};

const SLOT_LIST_ATTEMPTS: usize = 4;

/// Symbolic name for common return values, hex otherwise.
pub fn rv_name(rv: CkRv) -> String {
    let name = match rv {
        CKR_OK => "CKR_OK",
        CKR_HOST_MEMORY => "CKR_HOST_MEMORY",
        CKR_SLOT_ID_INVALID => "CKR_SLOT_ID_INVALID",
        CKR_GENERAL_ERROR => "CKR_GENERAL_ERROR",
        CKR_FUNCTION_FAILED => "CKR_FUNCTION_FAILED",
        CKR_ARGUMENTS_BAD => "CKR_ARGUMENTS_BAD",
        CKR_DEVICE_ERROR => "CKR_DEVICE_ERROR",
        CKR_DEVICE_REMOVED => "CKR_DEVICE_REMOVED",
        CKR_FUNCTION_NOT_SUPPORTED => "CKR_FUNCTION_NOT_SUPPORTED",
        CKR_TOKEN_NOT_PRESENT => "CKR_TOKEN_NOT_PRESENT",
        CKR_TOKEN_NOT_RECOGNIZED => "CKR_TOKEN_NOT_RECOGNIZED",
        CKR_BUFFER_TOO_SMALL => "CKR_BUFFER_TOO_SMALL",
        CKR_CRYPTOKI_NOT_INITIALIZED => "CKR_CRYPTOKI_NOT_INITIALIZED",
        CKR_CRYPTOKI_ALREADY_INITIALIZED => "CKR_CRYPTOKI_ALREADY_INITIALIZED",
        _ => return format!("{rv:#x}"),
    };
    name.to_string()
}

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize)]
pub struct Version {
    pub major: u8,
    pub minor: u8,
}

impl From<CkVersion> for Version {
    fn from(version: CkVersion) -> Self {
        Self {
            major: version.major,
            minor: version.minor,
        }
    }
}

impl std::fmt::Display for Version {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct LibraryInfo {
    pub cryptoki_version: Version,
    pub manufacturer: String,
    pub flags: u64,
    pub description: String,
    pub library_version: Version,
}

#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct SlotInfo {
    pub description: String,
    pub manufacturer: String,
    pub flags: u64,
    pub hardware_version: Version,
    pub firmware_version: Version,
}

#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct TokenInfo {
    pub label: String,
    pub manufacturer: String,
    pub model: String,
    pub serial_number: String,
    pub flags: u64,
    pub session_count: u64,
    pub max_session_count: u64,
    pub rw_session_count: u64,
    pub max_rw_session_count: u64,
    pub min_pin_len: u64,
    pub max_pin_len: u64,
    pub free_public_memory: u64,
    pub total_public_memory: u64,
    pub free_private_memory: u64,
    pub total_private_memory: u64,
    pub hardware_version: Version,
    pub firmware_version: Version,
    pub utc_time: String,
}

/// One failed per-slot query; enumeration continues past it.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct QueryFailure {
    pub call: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rv: Option<u64>,
    pub message: String,
}

impl QueryFailure {
    fn from_error(call: &str, err: &Error) -> Self {
        Self {
            call: err.symbol().unwrap_or(call).to_string(),
            rv: err.rv().map(u64::from),
            message: err
                .message()
                .map(str::to_string)
                .unwrap_or_else(|| err.to_string()),
        }
    }
}

#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct SlotReport {
    pub id: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub slot: Option<SlotInfo>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token: Option<TokenInfo>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub failures: Vec<QueryFailure>,
}

#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct Inventory {
    pub module: PathBuf,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub library: Option<LibraryInfo>,
    pub slots: Vec<SlotReport>,
}

/// An initialized provider; finalized explicitly or on drop.
pub struct Cryptoki<'a> {
    functions: &'a CkFunctionList,
    finalized: bool,
}

impl<'a> Cryptoki<'a> {
    pub fn initialize(functions: &'a CkFunctionList) -> Result<Self, Error> {
        let initialize = entry(functions.initialize, "C_Initialize")?;
        check("C_Initialize", unsafe { initialize(ptr::null_mut()) })?;
        debug!("provider initialized");
        Ok(Self {
            functions,
            finalized: false,
        })
    }

    pub fn finalize(mut self) -> Result<(), Error> {
        self.finalized = true;
        let finalize = entry(self.functions.finalize, "C_Finalize")?;
        check("C_Finalize", unsafe { finalize(ptr::null_mut()) })
    }

    pub fn library_info(&self) -> Result<LibraryInfo, Error> {
        let get_info = entry(self.functions.get_info, "C_GetInfo")?;
        let mut info = CkInfo::default();
        check("C_GetInfo", unsafe { get_info(&mut info) })?;
        Ok(LibraryInfo {
            cryptoki_version: info.cryptoki_version.into(),
            manufacturer: padded_text(&info.manufacturer_id),
            flags: u64::from(info.flags),
            description: padded_text(&info.library_description),
            library_version: info.library_version.into(),
        })
    }

    /// Slot ids, restricted to slots holding a token when `token_present` is set.
    pub fn slot_list(&self, token_present: bool) -> Result<Vec<CkSlotId>, Error> {
        let get_slot_list = entry(self.functions.get_slot_list, "C_GetSlotList")?;
        let flag = if token_present { CK_TRUE } else { CK_FALSE };

        for _ in 0..SLOT_LIST_ATTEMPTS {
            let mut count: CkUlong = 0;
            check("C_GetSlotList", unsafe {
                get_slot_list(flag, ptr::null_mut(), &mut count)
            })?;
            if count == 0 {
                return Ok(Vec::new());
            }

            let mut slots: Vec<CkSlotId> = vec![0; count as usize];
            let rv = unsafe { get_slot_list(flag, slots.as_mut_ptr(), &mut count) };
            if rv == CKR_BUFFER_TOO_SMALL {
                debug!(count, "slot list grew between calls; retrying");
                continue;
            }
            check("C_GetSlotList", rv)?;
            slots.truncate(count as usize);
            return Ok(slots);
        }

        Err(Error::new(ErrorKind::Provider)
            .with_message(format!(
                "slot list kept growing across {SLOT_LIST_ATTEMPTS} attempts"
            ))
            .with_symbol("C_GetSlotList")
            .with_rv(CKR_BUFFER_TOO_SMALL))
    }

    pub fn slot_info(&self, id: CkSlotId) -> Result<SlotInfo, Error> {
        let get_slot_info = entry(self.functions.get_slot_info, "C_GetSlotInfo")?;
        let mut info = CkSlotInfo::default();
        check("C_GetSlotInfo", unsafe { get_slot_info(id, &mut info) })?;
        Ok(SlotInfo {
            description: padded_text(&info.slot_description),
            manufacturer: padded_text(&info.manufacturer_id),
            flags: u64::from(info.flags),
            hardware_version: info.hardware_version.into(),
            firmware_version: info.firmware_version.into(),
        })
    }

    pub fn token_info(&self, id: CkSlotId) -> Result<TokenInfo, Error> {
        let get_token_info = entry(self.functions.get_token_info, "C_GetTokenInfo")?;
        let mut info = CkTokenInfo::default();
        check("C_GetTokenInfo", unsafe { get_token_info(id, &mut info) })?;
        Ok(TokenInfo {
            label: padded_text(&info.label),
            manufacturer: padded_text(&info.manufacturer_id),
            model: padded_text(&info.model),
            serial_number: padded_text(&info.serial_number),
            flags: u64::from(info.flags),
            session_count: u64::from(info.session_count),
            max_session_count: u64::from(info.max_session_count),
            rw_session_count: u64::from(info.rw_session_count),
            max_rw_session_count: u64::from(info.max_rw_session_count),
            min_pin_len: u64::from(info.min_pin_len),
            max_pin_len: u64::from(info.max_pin_len),
            free_public_memory: u64::from(info.free_public_memory),
            total_public_memory: u64::from(info.total_public_memory),
            free_private_memory: u64::from(info.free_private_memory),
            total_private_memory: u64::from(info.total_private_memory),
            hardware_version: info.hardware_version.into(),
            firmware_version: info.firmware_version.into(),
            utc_time: padded_text(&info.utc_time),
        })
    }
}

impl Drop for Cryptoki<'_> {
    fn drop(&mut self) {
        if self.finalized {
            return;
        }
        if let Some(finalize) = self.functions.finalize {
            let rv = unsafe { finalize(ptr::null_mut()) };
            if rv != CKR_OK {
                warn!(rv = %rv_name(rv), "C_Finalize failed during drop");
            }
        }
    }
}

/// Collects library, slot, and token records. Only a slot-list failure is fatal.
pub fn inventory(
    cryptoki: &Cryptoki<'_>,
    module: &Path,
    token_present: bool,
) -> Result<Inventory, Error> {
    let library = match cryptoki.library_info() {
        Ok(info) => Some(info),
        Err(err) => {
            warn!(%err, "library info unavailable");
            None
        }
    };
    let slots = cryptoki
        .slot_list(token_present)?
        .into_iter()
        .map(|id| slot_report(cryptoki, id))
        .collect();

    Ok(Inventory {
        module: module.to_path_buf(),
        library,
        slots,
    })
}

fn slot_report(cryptoki: &Cryptoki<'_>, id: CkSlotId) -> SlotReport {
    let mut report = SlotReport {
        id: u64::from(id),
        slot: None,
        token: None,
        failures: Vec::new(),
    };

    match cryptoki.token_info(id) {
        Ok(token) => report.token = Some(token),
        // An empty slot is expected when enumerating all slots.
        Err(err) if err.rv() == Some(CKR_TOKEN_NOT_PRESENT) => {}
        Err(err) => {
            warn!(slot = report.id, %err, "token info unavailable");
            report
                .failures
                .push(QueryFailure::from_error("C_GetTokenInfo", &err));
        }
    }
    match cryptoki.slot_info(id) {
        Ok(slot) => report.slot = Some(slot),
        Err(err) => {
            warn!(slot = report.id, %err, "slot info unavailable");
            report
                .failures
                .push(QueryFailure::from_error("C_GetSlotInfo", &err));
        }
    }
    report
}

fn entry<F>(function: Option<F>, name: &'static str) -> Result<F, Error> {
    function.ok_or_else(|| {
        Error::new(ErrorKind::Provider)
            .with_message(format!("provider does not implement {name}"))
            .with_symbol(name)
    })
}

fn check(name: &'static str, rv: CkRv) -> Result<(), Error> {
    if rv == CKR_OK {
        return Ok(());
    }
    Err(Error::new(ErrorKind::Provider)
        .with_message(format!("{name} failed: {}", rv_name(rv)))
        .with_symbol(name)
        .with_rv(rv))
}

/// Blank-padded fixed-width text field to a trimmed string.
fn padded_text(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes)
        .trim_end_matches([' ', '\0'])
        .to_string()
}

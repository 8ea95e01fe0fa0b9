// Raw PKCS#11 ABI mirrors (Unix layout, no struct packing).
use std::os::raw::{c_uchar, c_ulong, c_void};

pub type CkUlong = c_ulong;
pub type CkRv = CkUlong;
pub type CkSlotId = CkUlong;
pub type CkFlags = CkUlong;
pub type CkBool = c_uchar;

pub const CK_TRUE: CkBool = 1;
pub const CK_FALSE: CkBool = 0;

pub const CKR_OK: CkRv = 0x00;
pub const CKR_HOST_MEMORY: CkRv = 0x02;
pub const CKR_SLOT_ID_INVALID: CkRv = 0x03;
pub const CKR_GENERAL_ERROR: CkRv = 0x05;
pub const CKR_FUNCTION_FAILED: CkRv = 0x06;
pub const CKR_ARGUMENTS_BAD: CkRv = 0x07;
pub const CKR_DEVICE_ERROR: CkRv = 0x30;
pub const CKR_DEVICE_REMOVED: CkRv = 0x32;
pub const CKR_FUNCTION_NOT_SUPPORTED: CkRv = 0x54;
pub const CKR_TOKEN_NOT_PRESENT: CkRv = 0xE0;
pub const CKR_TOKEN_NOT_RECOGNIZED: CkRv = 0xE1;
pub const CKR_BUFFER_TOO_SMALL: CkRv = 0x150;
pub const CKR_CRYPTOKI_NOT_INITIALIZED: CkRv = 0x190;
pub const CKR_CRYPTOKI_ALREADY_INITIALIZED: CkRv = 0x191;

/// Exported entry point every provider module must carry.
pub const GET_FUNCTION_LIST_SYMBOL: &std::ffi::CStr = c"C_GetFunctionList";

#[repr(C)]
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct CkVersion {
    pub major: c_uchar,
    pub minor: c_uchar,
}

#[repr(C)]
#[derive(Clone, Copy, Debug)]
pub struct CkInfo {
    pub cryptoki_version: CkVersion,
    pub manufacturer_id: [c_uchar; 32],
    pub flags: CkFlags,
    pub library_description: [c_uchar; 32],
    pub library_version: CkVersion,
}

#[repr(C)]
#[derive(Clone, Copy, Debug)]
pub struct CkSlotInfo {
    pub slot_description: [c_uchar; 64],
    pub manufacturer_id: [c_uchar; 32],
    pub flags: CkFlags,
    pub hardware_version: CkVersion,
    pub firmware_version: CkVersion,
}

#[repr(C)]
#[derive(Clone, Copy, Debug)]
pub struct CkTokenInfo {
    pub label: [c_uchar; 32],
    pub manufacturer_id: [c_uchar; 32],
    pub model: [c_uchar; 16],
    pub serial_number: [c_uchar; 16],
    pub flags: CkFlags,
    pub max_session_count: CkUlong,
    pub session_count: CkUlong,
    pub max_rw_session_count: CkUlong,
    pub rw_session_count: CkUlong,
    pub max_pin_len: CkUlong,
    pub min_pin_len: CkUlong,
    pub total_public_memory: CkUlong,
    pub free_public_memory: CkUlong,
    pub total_private_memory: CkUlong,
    pub free_private_memory: CkUlong,
    pub hardware_version: CkVersion,
    pub firmware_version: CkVersion,
    pub utc_time: [c_uchar; 16],
}

// All-zero is a valid value for these plain-data structs; used as out-parameters.
macro_rules! zeroed_default {
    ($($ty:ty),*) => {
        $(impl Default for $ty {
            fn default() -> Self {
                unsafe { std::mem::zeroed() }
            }
        })*
    };
}

zeroed_default!(CkInfo, CkSlotInfo, CkTokenInfo);

pub type CkGetFunctionList = unsafe extern "C" fn(*mut *mut CkFunctionList) -> CkRv;

/// Number of v2.x table entries after `C_GetTokenInfo` that this crate never calls.
pub const UNTYPED_ENTRY_COUNT: usize = 61;

#[repr(C)]
pub struct CkFunctionList {
    pub version: CkVersion,
    pub initialize: Option<unsafe extern "C" fn(*mut c_void) -> CkRv>,
    pub finalize: Option<unsafe extern "C" fn(*mut c_void) -> CkRv>,
    pub get_info: Option<unsafe extern "C" fn(*mut CkInfo) -> CkRv>,
    pub get_function_list: Option<CkGetFunctionList>,
    pub get_slot_list: Option<unsafe extern "C" fn(CkBool, *mut CkSlotId, *mut CkUlong) -> CkRv>,
    pub get_slot_info: Option<unsafe extern "C" fn(CkSlotId, *mut CkSlotInfo) -> CkRv>,
    pub get_token_info: Option<unsafe extern "C" fn(CkSlotId, *mut CkTokenInfo) -> CkRv>,
    /// `C_GetMechanismList` through `C_WaitForSlotEvent`, kept only for layout.
    pub untyped: [Option<unsafe extern "C" fn()>; UNTYPED_ENTRY_COUNT],
}

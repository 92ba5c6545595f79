//! Raw control-channel ABI
//!
//! Bit-exact argument blocks and request codes shared with monitor
//! processes, plus `dispatch`, which decodes one request against a
//! `ControlChannel` the way a character-device ioctl handler would.
//!
//! Every request returns `0` or a negative errno. Blocks with an output
//! half also carry the absolute errno in `error_code`.

use std::ffi::c_void;
use std::mem::size_of;
use std::ptr;

use hangtrap_core::error::{TrapError, TrapResult};
use hangtrap_core::id::Bdf;
use hangtrap_core::state::TrapEventKind;
use nix::request_code_readwrite;

use crate::channel::ControlChannel;

/// Integer type of an ioctl request on this platform
pub type RequestCode = nix::sys::ioctl::ioctl_num_type;

// ── ioctl ──

pub const IOC_GROUP: u8 = b'g';
pub const COMMAND_BASE: u8 = 0x10;

pub const CMD_START_TRAP: u8 = 1;
pub const CMD_NOTIFY_DUMP_DONE: u8 = 2;
pub const CMD_GET_DIAG_DATA: u8 = 3;
pub const CMD_STOP_TRAP: u8 = 4;
pub const CMD_GET_FFBM_DATA: u8 = 5;
pub const CMD_GET_MES_DBG_INFO: u8 = 6;

// ── Argument blocks ──

#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TrapGpuIn {
    /// PF BDF of the device to trap
    pub dbsf: u32,
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TrapGpuOut {
    /// Function that woke the monitor (PF or VF)
    pub dbsf: u32,
    pub idx_vf: u32,
    pub event: u32,
    pub error_code: u32,
    pub cookie: u32,
}

/// StartTrap
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TrapGpuInfo {
    pub input: TrapGpuIn,
    pub output: TrapGpuOut,
}

/// NotifyDumpDone
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NotifyDoneInfo {
    pub dbsf: u32,
}

/// StopTrap
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StopTrapInfo {
    pub dbsf: u32,
}

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DiagDataIn {
    pub dbsf: u32,
    /// Capacity of `buffer` in bytes
    pub buffer_size: u32,
    pub buffer: *mut c_void,
}

impl Default for DiagDataIn {
    fn default() -> Self {
        Self {
            dbsf: 0,
            buffer_size: 0,
            buffer: ptr::null_mut(),
        }
    }
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DiagDataOut {
    pub data_size: u32,
    pub error_code: u32,
    pub cookie: u32,
}

/// GetDiagnosticData
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DiagDataArgs {
    pub input: DiagDataIn,
    pub output: DiagDataOut,
}

/// GetFfbmData
///
/// `buffer` must hold `TrapConfig::ffbm_buffer_size()` bytes.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FfbmBlock {
    pub dbsf: u64,
    pub buffer: *mut c_void,
}

/// GetMesDebugInfo
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MesDbgInfoBlock {
    pub dbsf: u32,
    pub dbg_size: u32,
    pub dbg_addr: u64,
}

// ── Request codes: _IOWR('g', 0x10 + cmd, size) ──

pub const START_TRAP_GPU_HANG: RequestCode =
    request_code_readwrite!(IOC_GROUP, COMMAND_BASE + CMD_START_TRAP, size_of::<TrapGpuInfo>());
pub const NOTIFY_DUMP_DONE: RequestCode =
    request_code_readwrite!(IOC_GROUP, COMMAND_BASE + CMD_NOTIFY_DUMP_DONE, size_of::<NotifyDoneInfo>());
pub const GET_DIAG_DATA: RequestCode =
    request_code_readwrite!(IOC_GROUP, COMMAND_BASE + CMD_GET_DIAG_DATA, size_of::<DiagDataArgs>());
pub const STOP_TRAP_GPU_HANG: RequestCode =
    request_code_readwrite!(IOC_GROUP, COMMAND_BASE + CMD_STOP_TRAP, size_of::<StopTrapInfo>());
// Encoded with a zero size, unlike the others
pub const GET_FFBM_DATA: RequestCode = request_code_readwrite!(IOC_GROUP, COMMAND_BASE + CMD_GET_FFBM_DATA, 0);
pub const GET_MES_DBG_INFO: RequestCode =
    request_code_readwrite!(IOC_GROUP, COMMAND_BASE + CMD_GET_MES_DBG_INFO, size_of::<MesDbgInfoBlock>());

fn errno_of(err: TrapError) -> u32 {
    err.errno().unsigned_abs()
}

fn to_return_code(result: TrapResult<()>) -> i32 {
    match result {
        Ok(()) => 0,
        Err(err) => err.as_return_code(),
    }
}

/// Run one raw request against `channel`
///
/// Returns `0` or a negative errno. A null `arg` or an unknown request
/// yields `-EINVAL` without touching the channel.
///
/// # Safety
///
/// `arg` must be null or point to a readable and writable block of the
/// type the request names. Any buffer pointer inside the block must be
/// valid for writes of the size that block describes.
pub unsafe fn dispatch(channel: &ControlChannel, request: RequestCode, arg: *mut c_void) -> i32 {
    if arg.is_null() {
        return TrapError::InvalidArgument.as_return_code();
    }

    // SAFETY: forwarded from the caller's contract on `arg`.
    let result = unsafe {
        match request {
            START_TRAP_GPU_HANG => start_trap(channel, arg.cast()),
            NOTIFY_DUMP_DONE => notify_dump_done(channel, arg.cast()),
            GET_DIAG_DATA => get_diag_data(channel, arg.cast()),
            STOP_TRAP_GPU_HANG => stop_trap(channel, arg.cast()),
            GET_FFBM_DATA => get_ffbm_data(channel, arg.cast()),
            GET_MES_DBG_INFO => get_mes_dbg_info(channel, arg.cast()),
            _ => {
                tracing::warn!(request = request as u64, "unknown control request");
                Err(TrapError::InvalidArgument)
            }
        }
    };
    to_return_code(result)
}

unsafe fn start_trap(channel: &ControlChannel, arg: *mut TrapGpuInfo) -> TrapResult<()> {
    // SAFETY: caller guarantees `arg` points to a `TrapGpuInfo`.
    let mut info = unsafe { arg.read_unaligned() };
    let result = channel.start_trap(Bdf::new(info.input.dbsf));

    info.output = match &result {
        Ok(outcome) => TrapGpuOut {
            dbsf: outcome.bdf.as_u32(),
            idx_vf: outcome.vf_index.as_u32(),
            event: outcome.event.as_u32(),
            error_code: outcome.error_code,
            cookie: outcome.cookie,
        },
        Err(err) => TrapGpuOut {
            event: TrapEventKind::Error.as_u32(),
            error_code: errno_of(*err),
            ..TrapGpuOut::default()
        },
    };
    // SAFETY: as above.
    unsafe { arg.write_unaligned(info) };
    result.map(drop)
}

unsafe fn notify_dump_done(channel: &ControlChannel, arg: *mut NotifyDoneInfo) -> TrapResult<()> {
    // SAFETY: caller guarantees `arg` points to a `NotifyDoneInfo`.
    let info = unsafe { arg.read_unaligned() };
    channel.notify_dump_done(Bdf::new(info.dbsf))
}

unsafe fn stop_trap(channel: &ControlChannel, arg: *mut StopTrapInfo) -> TrapResult<()> {
    // SAFETY: caller guarantees `arg` points to a `StopTrapInfo`.
    let info = unsafe { arg.read_unaligned() };
    channel.stop_trap(Bdf::new(info.dbsf))
}

unsafe fn get_diag_data(channel: &ControlChannel, arg: *mut DiagDataArgs) -> TrapResult<()> {
    // SAFETY: caller guarantees `arg` points to a `DiagDataArgs`.
    let mut args = unsafe { arg.read_unaligned() };
    let input = args.input;

    let result = channel
        .get_diagnostic_data(Bdf::new(input.dbsf), input.buffer_size as usize)
        .and_then(|data| {
            if !data.is_empty() {
                if input.buffer.is_null() {
                    return Err(TrapError::InvalidArgument);
                }
                // SAFETY: `buffer` holds `buffer_size` bytes and the read
                // never returns more than was requested.
                unsafe {
                    ptr::copy_nonoverlapping(data.bytes.as_ptr(), input.buffer.cast::<u8>(), data.len());
                }
            }
            Ok(data)
        });

    args.output = match &result {
        Ok(data) => DiagDataOut {
            data_size: data.len() as u32,
            error_code: 0,
            cookie: data.cookie,
        },
        Err(err) => DiagDataOut {
            error_code: errno_of(*err),
            ..DiagDataOut::default()
        },
    };
    // SAFETY: as above.
    unsafe { arg.write_unaligned(args) };
    result.map(drop)
}

unsafe fn get_ffbm_data(channel: &ControlChannel, arg: *mut FfbmBlock) -> TrapResult<()> {
    // SAFETY: caller guarantees `arg` points to an `FfbmBlock`.
    let block = unsafe { arg.read_unaligned() };
    let bdf = u32::try_from(block.dbsf).map_err(|_| TrapError::InvalidArgument)?;

    let data = channel.get_ffbm_data(Bdf::new(bdf));
    if data.is_empty() {
        return Ok(());
    }
    if block.buffer.is_null() {
        return Err(TrapError::InvalidArgument);
    }
    // SAFETY: the caller sized `buffer` for the full record budget, which
    // bounds `data`.
    unsafe { ptr::copy_nonoverlapping(data.as_ptr(), block.buffer.cast::<u8>(), data.len()) };
    Ok(())
}

unsafe fn get_mes_dbg_info(channel: &ControlChannel, arg: *mut MesDbgInfoBlock) -> TrapResult<()> {
    // SAFETY: caller guarantees `arg` points to a `MesDbgInfoBlock`.
    let mut block = unsafe { arg.read_unaligned() };
    let result = channel.get_mes_debug_info(Bdf::new(block.dbsf));

    let info = result.unwrap_or_default();
    block.dbg_size = info.size;
    block.dbg_addr = info.addr;
    // SAFETY: as above.
    unsafe { arg.write_unaligned(block) };
    result.map(drop)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TrapConfig;
    use crate::control::DebugControl;
    use crate::process::SimProcessTable;
    use hangtrap_core::backend::{MesDebugInfo, StaticBackend};
    use hangtrap_core::id::DeviceHandle;
    use std::sync::Arc;

    const DEV: DeviceHandle = DeviceHandle::new(1);
    const PF: Bdf = Bdf::new(0x0800);

    fn setup(backend: StaticBackend) -> (DebugControl, Arc<SimProcessTable>) {
        let procs = Arc::new(SimProcessTable::new());
        let control = DebugControl::new(TrapConfig::new(), procs.clone(), Arc::new(backend));
        control.attach_device(DEV, PF, 0);
        (control, procs)
    }

    fn raw<T>(block: &mut T) -> *mut c_void {
        (block as *mut T).cast()
    }

    #[test]
    fn test_block_layout() {
        assert_eq!(size_of::<TrapGpuInfo>(), 24);
        assert_eq!(size_of::<NotifyDoneInfo>(), 4);
        assert_eq!(size_of::<StopTrapInfo>(), 4);
        assert_eq!(size_of::<MesDbgInfoBlock>(), 16);
        #[cfg(target_pointer_width = "64")]
        {
            assert_eq!(size_of::<DiagDataArgs>(), 32);
            assert_eq!(size_of::<FfbmBlock>(), 16);
        }
    }

    #[cfg(all(target_os = "linux", any(target_arch = "x86_64", target_arch = "aarch64")))]
    #[test]
    fn test_request_codes() {
        assert_eq!(START_TRAP_GPU_HANG as u32, 0xc018_6711);
        assert_eq!(NOTIFY_DUMP_DONE as u32, 0xc004_6712);
        assert_eq!(STOP_TRAP_GPU_HANG as u32, 0xc004_6714);
        assert_eq!(GET_FFBM_DATA as u32, 0xc000_6715);
        assert_eq!(GET_MES_DBG_INFO as u32, 0xc010_6716);
    }

    #[test]
    fn test_null_and_unknown() {
        let (control, _) = setup(StaticBackend::new());
        let channel = control.open_channel();
        let einval = -libc::EINVAL;

        // SAFETY: null is handled before any access.
        assert_eq!(unsafe { dispatch(&channel, START_TRAP_GPU_HANG, ptr::null_mut()) }, einval);
        let mut info = StopTrapInfo::default();
        // SAFETY: `info` is a valid block.
        assert_eq!(unsafe { dispatch(&channel, 0x1234, raw(&mut info)) }, einval);
    }

    #[test]
    fn test_start_trap_error_mirrored() {
        let (control, _) = setup(StaticBackend::new());
        let channel = control.open_channel();

        let mut info = TrapGpuInfo {
            input: TrapGpuIn { dbsf: 0x0900 },
            ..Default::default()
        };
        // SAFETY: `info` is a valid `TrapGpuInfo`.
        let rc = unsafe { dispatch(&channel, START_TRAP_GPU_HANG, raw(&mut info)) };
        assert_eq!(rc, -libc::ENODEV);
        assert_eq!(info.output.error_code, libc::ENODEV as u32);
        assert_eq!(info.output.event, TrapEventKind::Error.as_u32());
        assert_eq!(info.output.cookie, 0);
    }

    #[test]
    fn test_diag_data_without_session() {
        let backend = StaticBackend::new();
        backend.set_diag_data(PF, vec![1, 2, 3]);
        let (control, _) = setup(backend);
        let channel = control.open_channel();

        let mut buf = [0u8; 16];
        let mut args = DiagDataArgs {
            input: DiagDataIn {
                dbsf: PF.as_u32(),
                buffer_size: buf.len() as u32,
                buffer: buf.as_mut_ptr().cast(),
            },
            output: DiagDataOut {
                data_size: 99,
                error_code: 99,
                cookie: 99,
            },
        };
        // SAFETY: `args` and `buf` outlive the call.
        let rc = unsafe { dispatch(&channel, GET_DIAG_DATA, raw(&mut args)) };
        assert_eq!(rc, 0);
        assert_eq!(args.output, DiagDataOut::default());
        assert_eq!(buf, [0u8; 16]);
    }

    #[test]
    fn test_notify_without_session() {
        let (control, procs) = setup(StaticBackend::new());
        procs.enter(procs.spawn("monitor"));
        let channel = control.open_channel();

        let mut info = NotifyDoneInfo { dbsf: PF.as_u32() };
        // SAFETY: `info` is a valid `NotifyDoneInfo`.
        let rc = unsafe { dispatch(&channel, NOTIFY_DUMP_DONE, raw(&mut info)) };
        assert_eq!(rc, TrapError::PermissionDenied.as_return_code());
    }

    #[test]
    fn test_ffbm_copy() {
        let backend = StaticBackend::new();
        backend.set_ffbm_data(DEV, vec![0x5a; 256]);
        let (control, _) = setup(backend);
        let channel = control.open_channel();

        let mut buf = vec![0u8; control.config().ffbm_buffer_size()];
        let mut block = FfbmBlock {
            dbsf: 0x0800,
            buffer: buf.as_mut_ptr().cast(),
        };
        // SAFETY: `buf` holds the full record budget.
        assert_eq!(unsafe { dispatch(&channel, GET_FFBM_DATA, raw(&mut block)) }, 0);
        assert_eq!(&buf[..256], &[0x5a; 256][..]);
        assert_eq!(buf[256], 0);

        block.buffer = ptr::null_mut();
        // SAFETY: null inner buffer is rejected before any write.
        let rc = unsafe { dispatch(&channel, GET_FFBM_DATA, raw(&mut block)) };
        assert_eq!(rc, -libc::EINVAL);
    }

    #[test]
    fn test_mes_dbg_info() {
        let vf = Bdf::new(0x0802);
        let backend = StaticBackend::new().with_vf(DEV, hangtrap_core::id::VfIndex::new(0), vf);
        backend.set_mes_debug_info(vf, MesDebugInfo { size: 0x2000, addr: 0x1_0000 });
        let (control, _) = setup(backend);
        let channel = control.open_channel();

        let mut block = MesDbgInfoBlock {
            dbsf: vf.as_u32(),
            ..Default::default()
        };
        // SAFETY: `block` is a valid `MesDbgInfoBlock`.
        assert_eq!(unsafe { dispatch(&channel, GET_MES_DBG_INFO, raw(&mut block)) }, 0);
        assert_eq!((block.dbg_size, block.dbg_addr), (0x2000, 0x1_0000));

        block = MesDbgInfoBlock {
            dbsf: 0x0a00,
            dbg_size: 7,
            dbg_addr: 7,
        };
        // SAFETY: as above.
        let rc = unsafe { dispatch(&channel, GET_MES_DBG_INFO, raw(&mut block)) };
        assert_eq!(rc, -libc::ENODEV);
        assert_eq!((block.dbg_size, block.dbg_addr), (0, 0));
    }
}

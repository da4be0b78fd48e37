//! In-memory kernel node, device and stream ring.
//!
//! Used by the test suites and by `dqs-ctl --simulate`. The simulated
//! kernel keeps real host memory for Control and Inter-Chip Spaces so the
//! views returned to callers can be read and written like the mapped
//! originals. Device memory is a sparse map of byte vectors.

use std::collections::{BTreeMap, BTreeSet};
use std::io;
use std::mem::size_of;
use std::os::fd::{FromRawFd, OwnedFd};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::Arc;

use nix::libc;
use parking_lot::Mutex;
use rustc_hash::{FxHashMap, FxHashSet};
use tracing::trace;

use crate::config::RuntimeConfig;
use crate::driver::{DeviceDriver, DqsPoolInfo, DqsQueueInfo, MemcpyKind, NotifyKind, QueueEntityType};
use crate::error::{DqsError, Result};
use crate::kernel::sys::{
    AccSubscribeParam, CtrlSpaceParam, CtrlSpaceResult, FrameAlignParam, FrameAlignResult,
    InterChipQueryResult, MbufPoolBindItem, MbufPoolList, QueueAllQueryResult, QueueBindParam,
    QueueBindResult, QueueIdList, QueueQueryParam, QueueQueryResult, QueueUnbindParam, StreamRef,
    UnbindType, CTRL_SPACE_OP_DESTROY,
};
use crate::kernel::{
    KernelShim, StarsCmd, StarsDqsCtrlSpace, StarsDqsInterChipGroup, StarsDqsInterChipSpace,
    WireStruct, DQS_INTER_CHIP_GROUP_MAX, DQS_MAX_QUEUE_NUM, QUEUE_BIND_MAX,
};
use crate::notify::NotifyWaitRequest;
use crate::queue::QueueBindingService;
use crate::sqe::Sqe;
use crate::stream::{DqsContext, StreamRing, StreamWithDqs};

fn errno(code: i32) -> io::Error {
    io::Error::from_raw_os_error(code)
}

/// Read the request struct named by the envelope.
///
/// # Safety
///
/// `args.input_ptr` must point to at least `args.input_len` readable bytes.
unsafe fn read_input<T: WireStruct>(args: &crate::kernel::sys::StarsIoctlCmdArgs) -> io::Result<T> {
    if (args.input_len as usize) < size_of::<T>() || args.input_ptr == 0 {
        return Err(errno(libc::EINVAL));
    }
    Ok(std::ptr::read_unaligned(args.input_ptr as *const T))
}

/// Write the response struct named by the envelope.
///
/// # Safety
///
/// `args.output_ptr` must point to at least `args.output_len` writable bytes.
unsafe fn write_output<T: WireStruct>(
    args: &crate::kernel::sys::StarsIoctlCmdArgs,
    value: &T,
) -> io::Result<()> {
    if (args.output_len as usize) < size_of::<T>() || args.output_ptr == 0 {
        return Err(errno(libc::EINVAL));
    }
    std::ptr::write_unaligned(args.output_ptr as *mut T, *value);
    Ok(())
}

#[derive(Default)]
struct KernelState {
    bindings: BTreeMap<u32, Vec<u32>>,
    pools: FxHashMap<u32, MbufPoolBindItem>,
    frame_align: FxHashMap<(u32, u32), FrameAlignParam>,
    subscriptions: Vec<AccSubscribeParam>,
    ctrl_spaces: FxHashMap<(u32, u32), Box<StarsDqsCtrlSpace>>,
    inter_chip: FxHashMap<(u32, u32), Box<StarsDqsInterChipSpace>>,
}

/// Simulated STARS control node.
#[derive(Default)]
pub struct SimKernel {
    opens: AtomicUsize,
    fail_open: AtomicBool,
    null_spaces: AtomicBool,
    ctrl_status: AtomicU32,
    failures: Mutex<FxHashMap<StarsCmd, i32>>,
    log: Mutex<Vec<StarsCmd>>,
    state: Mutex<KernelState>,
}

impl SimKernel {
    /// Kernel with nothing mapped and no failures armed.
    pub fn new() -> Self {
        Self::default()
    }

    /// Times the node was opened.
    pub fn open_count(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }

    /// Make opening the node fail.
    pub fn set_fail_open(&self, fail: bool) {
        self.fail_open.store(fail, Ordering::SeqCst);
    }

    /// Make every later `cmd` fail with `code`.
    pub fn fail_command(&self, cmd: StarsCmd, code: i32) {
        self.failures.lock().insert(cmd, code);
    }

    /// Disarm every [`fail_command`](Self::fail_command).
    pub fn clear_failures(&self) {
        self.failures.lock().clear();
    }

    /// Commands received so far, in order.
    pub fn commands(&self) -> Vec<StarsCmd> {
        self.log.lock().clone()
    }

    /// How often `cmd` was received.
    pub fn count_of(&self, cmd: StarsCmd) -> usize {
        self.log.lock().iter().filter(|&&c| c == cmd).count()
    }

    /// Most recent accelerator subscription still live.
    pub fn last_subscription(&self) -> Option<AccSubscribeParam> {
        self.state.lock().subscriptions.last().copied()
    }

    /// Live accelerator subscriptions.
    pub fn subscriptions(&self) -> Vec<AccSubscribeParam> {
        self.state.lock().subscriptions.clone()
    }

    /// Control Spaces currently mapped.
    pub fn live_ctrl_spaces(&self) -> usize {
        self.state.lock().ctrl_spaces.len()
    }

    /// Status reported by later Control Space creations.
    pub fn set_ctrl_space_status(&self, status: u32) {
        self.ctrl_status.store(status, Ordering::SeqCst);
    }

    /// Report null addresses for new Control and Inter-Chip Spaces.
    pub fn set_null_spaces(&self, null: bool) {
        self.null_spaces.store(null, Ordering::SeqCst);
    }

    /// Bind a pool as if another process had done it.
    pub fn add_pool_binding(&self, item: MbufPoolBindItem) {
        self.state.lock().pools.insert(item.queue_id, item);
    }

    /// Fill group `idx` of the Inter-Chip Space of `stream`, creating it if needed.
    pub fn set_inter_chip_group(&self, stream: StreamRef, idx: usize, group: StarsDqsInterChipGroup) {
        if idx >= DQS_INTER_CHIP_GROUP_MAX {
            return;
        }
        let mut state = self.state.lock();
        let space = state
            .inter_chip
            .entry((stream.stream_id, stream.ts_id))
            .or_insert_with(|| Box::new([StarsDqsInterChipGroup::default(); DQS_INTER_CHIP_GROUP_MAX]));
        space[idx] = group;
    }

    fn handle(&self, cmd: StarsCmd, args: &crate::kernel::sys::StarsIoctlCmdArgs) -> io::Result<i32> {
        let mut state = self.state.lock();
        // SAFETY: the channel builds the envelope from live references whose
        // sizes it records; read/write_* check those sizes.
        unsafe {
            match cmd {
                StarsCmd::QueueBind => {
                    let param: QueueBindParam = read_input(args)?;
                    let count = (param.count as usize).min(QUEUE_BIND_MAX);
                    let dsts = state.bindings.entry(param.src_qid).or_default();
                    for &dst in &param.dst_qids[..count] {
                        if !dsts.contains(&dst) {
                            dsts.push(dst);
                        }
                    }
                    write_output(args, &QueueBindResult::zeroed())?;
                }
                StarsCmd::QueueUnbind => {
                    let param: QueueUnbindParam = read_input(args)?;
                    let dsts = &param.dst_qids[..(param.count as usize).min(QUEUE_BIND_MAX)];
                    match param.unbind_type {
                        t if t == UnbindType::BySrc as u32 => {
                            state.bindings.remove(&param.src_qid);
                        }
                        t if t == UnbindType::ByDst as u32 => {
                            for list in state.bindings.values_mut() {
                                list.retain(|d| !dsts.contains(d));
                            }
                        }
                        t if t == UnbindType::ByBoth as u32 => {
                            if let Some(list) = state.bindings.get_mut(&param.src_qid) {
                                list.retain(|d| !dsts.contains(d));
                            }
                        }
                        _ => return Err(errno(libc::EINVAL)),
                    }
                    state.bindings.retain(|_, list| !list.is_empty());
                }
                StarsCmd::QueueQuery => {
                    let param: QueueQueryParam = read_input(args)?;
                    let mut result = QueueQueryResult::zeroed();
                    if let Some(list) = state.bindings.get(&param.src_qid) {
                        result.count = list.len() as u32;
                        result.dst_qids[..list.len()].copy_from_slice(list);
                    }
                    write_output(args, &result)?;
                }
                StarsCmd::QueueAllQuery => {
                    let mut result = QueueAllQueryResult::zeroed();
                    let pairs = state
                        .bindings
                        .iter()
                        .flat_map(|(&src, dsts)| dsts.iter().map(move |&dst| (src, dst)))
                        .take(QUEUE_BIND_MAX);
                    for (slot, (src_qid, dst_qid)) in result.pairs.iter_mut().zip(pairs) {
                        slot.src_qid = src_qid;
                        slot.dst_qid = dst_qid;
                        result.count += 1;
                    }
                    write_output(args, &result)?;
                }
                StarsCmd::MbufPoolBind => {
                    let param: MbufPoolList = read_input(args)?;
                    for item in &param.items[..(param.count as usize).min(DQS_MAX_QUEUE_NUM)] {
                        state.pools.insert(item.queue_id, *item);
                    }
                }
                StarsCmd::MbufPoolUnbind => {
                    let param: QueueIdList = read_input(args)?;
                    for qid in &param.queue_ids[..(param.count as usize).min(DQS_MAX_QUEUE_NUM)] {
                        state.pools.remove(qid);
                    }
                }
                StarsCmd::MbufPoolQuery => {
                    let param: QueueIdList = read_input(args)?;
                    let mut result = MbufPoolList::default();
                    let known = param.queue_ids[..(param.count as usize).min(DQS_MAX_QUEUE_NUM)]
                        .iter()
                        .filter_map(|qid| state.pools.get(qid));
                    for (slot, item) in result.items.iter_mut().zip(known) {
                        *slot = *item;
                        result.count += 1;
                    }
                    write_output(args, &result)?;
                }
                StarsCmd::FrameAlignBind => {
                    let param: FrameAlignParam = read_input(args)?;
                    state.frame_align.insert((param.stream_id, param.ts_id), param);
                    write_output(args, &FrameAlignResult::default())?;
                }
                StarsCmd::FrameAlignUnbind => {
                    let stream: StreamRef = read_input(args)?;
                    state.frame_align.remove(&(stream.stream_id, stream.ts_id));
                }
                StarsCmd::FrameAlignUpdate => {
                    let _: StreamRef = read_input(args)?;
                }
                StarsCmd::AccSubscribe => {
                    let param: AccSubscribeParam = read_input(args)?;
                    state.subscriptions.push(param);
                }
                StarsCmd::CtrlSpace => {
                    let param: CtrlSpaceParam = read_input(args)?;
                    let key = (param.stream_id, param.ts_id);
                    let mut result = CtrlSpaceResult::default();
                    if param.op_type & CTRL_SPACE_OP_DESTROY != 0 {
                        state.ctrl_spaces.remove(&key);
                    } else {
                        result.status = self.ctrl_status.load(Ordering::SeqCst);
                        if result.status == 0 && !self.null_spaces.load(Ordering::SeqCst) {
                            let space = state
                                .ctrl_spaces
                                .entry(key)
                                .or_insert_with(|| Box::new(StarsDqsCtrlSpace::zeroed()));
                            result.ctrl_space_va = std::ptr::from_mut(&mut **space) as u64;
                        }
                    }
                    write_output(args, &result)?;
                }
                StarsCmd::InterChipSpaceQuery => {
                    let stream: StreamRef = read_input(args)?;
                    let mut result = InterChipQueryResult::default();
                    if !self.null_spaces.load(Ordering::SeqCst) {
                        let space = state
                            .inter_chip
                            .entry((stream.stream_id, stream.ts_id))
                            .or_insert_with(|| {
                                Box::new([StarsDqsInterChipGroup::default(); DQS_INTER_CHIP_GROUP_MAX])
                            });
                        result.inter_chip_space_va = space.as_mut_ptr() as u64;
                    }
                    write_output(args, &result)?;
                }
            }
        }
        Ok(0)
    }
}

impl KernelShim for SimKernel {
    fn open_node(&self, _path: &str) -> io::Result<OwnedFd> {
        if self.fail_open.load(Ordering::SeqCst) {
            return Err(errno(libc::ENOENT));
        }
        // SAFETY: static NUL-terminated name, no flags.
        let fd = unsafe { libc::memfd_create(c"sim_stars_dqs".as_ptr(), libc::MFD_CLOEXEC) };
        if fd < 0 {
            return Err(io::Error::last_os_error());
        }
        self.opens.fetch_add(1, Ordering::SeqCst);
        // SAFETY: fd was just created and is owned by nobody else.
        Ok(unsafe { OwnedFd::from_raw_fd(fd) })
    }

    fn ioctl(
        &self,
        _fd: &OwnedFd,
        request: u32,
        args: &mut crate::kernel::sys::StarsIoctlCmdArgs,
    ) -> io::Result<i32> {
        let cmd = StarsCmd::from_request(request).ok_or_else(|| errno(libc::ENOTTY))?;
        self.log.lock().push(cmd);
        if let Some(&code) = self.failures.lock().get(&cmd) {
            return Err(errno(code));
        }
        trace!(cmd = cmd.name(), "sim kernel command");
        self.handle(cmd, args)
    }
}

// ============================================================================
// Device
// ============================================================================

const DEVICE_MEM_BASE: u64 = 0x1_0000_0040;
const DEVICE_MEM_GAP: u64 = 0x40;

fn driver_err(op: &'static str, code: i32) -> DqsError {
    DqsError::Driver { op, code }
}

#[derive(Default)]
struct DeviceState {
    next_addr: u64,
    memory: BTreeMap<u64, Vec<u8>>,
    allocs: usize,
    frees: usize,
    last_alloc: Option<u64>,
    allocs_left: Option<usize>,
    fail_copy: bool,
    queues: FxHashMap<u32, DqsQueueInfo>,
    pools: FxHashMap<u32, DqsPoolInfo>,
    chip_id: u32,
    fail_chip_id: bool,
    fail_notify_create: bool,
    next_notify: u32,
    notifies: FxHashSet<(NotifyKind, u32)>,
}

impl DeviceState {
    /// Allocation holding `[addr, addr + len)`, as (base, offset).
    fn locate(&self, addr: u64, len: usize) -> Option<(u64, usize)> {
        let (&base, buf) = self.memory.range(..=addr).next_back()?;
        let offset = (addr - base) as usize;
        (offset + len <= buf.len()).then_some((base, offset))
    }
}

/// Simulated device driver.
pub struct SimDevice {
    device_id: u32,
    ts_id: u32,
    state: Mutex<DeviceState>,
}

impl Default for SimDevice {
    fn default() -> Self {
        Self::new()
    }
}

impl SimDevice {
    /// Device 0 on TS 0.
    pub fn new() -> Self {
        Self::with_ids(0, 0)
    }

    /// Device with the given ids.
    pub fn with_ids(device_id: u32, ts_id: u32) -> Self {
        Self {
            device_id,
            ts_id,
            state: Mutex::new(DeviceState {
                next_addr: DEVICE_MEM_BASE,
                next_notify: 1,
                ..Default::default()
            }),
        }
    }

    /// Size passed to the most recent allocation.
    pub fn last_alloc_size(&self) -> Option<u64> {
        self.state.lock().last_alloc
    }

    /// Let `n` more allocations succeed, then fail every one after.
    pub fn fail_alloc_after(&self, n: usize) {
        self.state.lock().allocs_left = Some(n);
    }

    /// Let allocations succeed again.
    pub fn clear_alloc_failure(&self) {
        self.state.lock().allocs_left = None;
    }

    /// Blocks allocated and not yet freed.
    pub fn live_allocations(&self) -> usize {
        self.state.lock().memory.len()
    }

    /// Successful allocations so far.
    pub fn alloc_count(&self) -> usize {
        self.state.lock().allocs
    }

    /// Frees so far.
    pub fn free_count(&self) -> usize {
        self.state.lock().frees
    }

    /// Make every device copy fail.
    pub fn set_fail_copy(&self, fail: bool) {
        self.state.lock().fail_copy = fail;
    }

    /// Register a queue the driver can resolve.
    pub fn add_queue(&self, info: DqsQueueInfo) {
        self.state.lock().queues.insert(info.queue_id, info);
    }

    /// Registered queue `queue_id`.
    pub fn queue(&self, queue_id: u32) -> Option<DqsQueueInfo> {
        self.state.lock().queues.get(&queue_id).copied()
    }

    /// Register an mbuf pool.
    pub fn add_pool(&self, info: DqsPoolInfo) {
        self.state.lock().pools.insert(info.pool_id, info);
    }

    /// Chip id reported to callers.
    pub fn set_chip_id(&self, chip_id: u32) {
        self.state.lock().chip_id = chip_id;
    }

    /// Make the chip id query fail.
    pub fn set_fail_chip_id(&self, fail: bool) {
        self.state.lock().fail_chip_id = fail;
    }

    /// Make notify creation fail.
    pub fn set_fail_notify_create(&self, fail: bool) {
        self.state.lock().fail_notify_create = fail;
    }

    /// Notify objects created and not destroyed.
    pub fn live_notifies(&self) -> usize {
        self.state.lock().notifies.len()
    }

    /// Write raw bytes, ignoring any injected copy failure.
    pub fn write(&self, addr: u64, bytes: &[u8]) -> Result<()> {
        let mut state = self.state.lock();
        let (base, offset) = state
            .locate(addr, bytes.len())
            .ok_or_else(|| driver_err("write", -libc::EFAULT))?;
        if let Some(buf) = state.memory.get_mut(&base) {
            buf[offset..offset + bytes.len()].copy_from_slice(bytes);
        }
        Ok(())
    }

    /// Read back `len` bytes at `addr`.
    pub fn read(&self, addr: u64, len: usize) -> Result<Vec<u8>> {
        let state = self.state.lock();
        let (base, offset) = state
            .locate(addr, len)
            .ok_or_else(|| driver_err("read", -libc::EFAULT))?;
        Ok(state.memory[&base][offset..offset + len].to_vec())
    }
}

impl DeviceDriver for SimDevice {
    fn device_id(&self) -> u32 {
        self.device_id
    }

    fn ts_id(&self) -> u32 {
        self.ts_id
    }

    fn mem_alloc(&self, size: u64) -> Result<u64> {
        let mut state = self.state.lock();
        state.last_alloc = Some(size);
        if let Some(left) = state.allocs_left.as_mut() {
            if *left == 0 {
                return Err(driver_err("mem_alloc", -libc::ENOMEM));
            }
            *left -= 1;
        }
        let addr = state.next_addr;
        state.next_addr += size.next_multiple_of(DEVICE_MEM_GAP) + DEVICE_MEM_GAP;
        state.memory.insert(addr, vec![0; size as usize]);
        state.allocs += 1;
        Ok(addr)
    }

    fn mem_free(&self, addr: u64) -> Result<()> {
        let mut state = self.state.lock();
        state
            .memory
            .remove(&addr)
            .ok_or_else(|| driver_err("mem_free", -libc::EINVAL))?;
        state.frees += 1;
        Ok(())
    }

    fn copy_to_device(&self, dst: u64, src: &[u8], _kind: MemcpyKind) -> Result<()> {
        if self.state.lock().fail_copy {
            return Err(driver_err("memcpy", -libc::EIO));
        }
        self.write(dst, src)
    }

    fn copy_from_device(&self, dst: &mut [u8], src: u64) -> Result<()> {
        let bytes = self.read(src, dst.len())?;
        dst.copy_from_slice(&bytes);
        Ok(())
    }

    fn queue_info(&self, queue_id: u32) -> Result<DqsQueueInfo> {
        self.queue(queue_id)
            .ok_or_else(|| driver_err("queue_info", -libc::ENODEV))
    }

    fn mbuf_pool_info(&self, pool_id: u32) -> Result<DqsPoolInfo> {
        self.state
            .lock()
            .pools
            .get(&pool_id)
            .copied()
            .ok_or_else(|| driver_err("mbuf_pool_info", -libc::ENODEV))
    }

    fn chip_id(&self) -> Result<u32> {
        let state = self.state.lock();
        if state.fail_chip_id {
            return Err(driver_err("chip_id", -libc::EIO));
        }
        Ok(state.chip_id)
    }

    fn notify_create(&self, kind: NotifyKind) -> Result<u32> {
        let mut state = self.state.lock();
        if state.fail_notify_create {
            return Err(driver_err("notify_create", -libc::ENOSPC));
        }
        let id = state.next_notify;
        state.next_notify += 1;
        state.notifies.insert((kind, id));
        Ok(id)
    }

    fn notify_destroy(&self, kind: NotifyKind, id: u32) -> Result<()> {
        if self.state.lock().notifies.remove(&(kind, id)) {
            Ok(())
        } else {
            Err(driver_err("notify_destroy", -libc::EINVAL))
        }
    }
}

// ============================================================================
// Ring
// ============================================================================

const EXEC_TIMES_BASE: u64 = 0x9_0000_0000;

#[derive(Default)]
struct RingState {
    tail: u32,
    outstanding: BTreeSet<u32>,
    submitted: Vec<(u32, Sqe)>,
    rollbacks: Vec<u32>,
    waits: Vec<NotifyWaitRequest>,
    fail_submit: bool,
    fail_wait: bool,
    fail_can_send: bool,
}

/// Simulated task ring of one stream.
pub struct SimRing {
    stream_id: u32,
    sq_id: u16,
    depth: u32,
    state: Mutex<RingState>,
}

impl SimRing {
    /// Ring of the default depth of 64.
    pub fn new(stream_id: u32, sq_id: u16) -> Self {
        Self::with_depth(stream_id, sq_id, 64)
    }

    /// Ring holding at most `depth` outstanding entries.
    pub fn with_depth(stream_id: u32, sq_id: u16, depth: u32) -> Self {
        Self {
            stream_id,
            sq_id,
            depth: depth.max(1),
            state: Mutex::new(RingState::default()),
        }
    }

    /// Make submission fail.
    pub fn set_fail_submit(&self, fail: bool) {
        self.state.lock().fail_submit = fail;
    }

    /// Make arming a wait fail.
    pub fn set_fail_wait(&self, fail: bool) {
        self.state.lock().fail_wait = fail;
    }

    /// Make the can-send check fail.
    pub fn set_fail_can_send(&self, fail: bool) {
        self.state.lock().fail_can_send = fail;
    }

    /// Entries written so far, with their slots.
    pub fn submitted(&self) -> Vec<(u32, Sqe)> {
        self.state.lock().submitted.clone()
    }

    /// Waits armed so far.
    pub fn waits(&self) -> Vec<NotifyWaitRequest> {
        self.state.lock().waits.clone()
    }

    /// Slots handed back unsubmitted.
    pub fn rollbacks(&self) -> Vec<u32> {
        self.state.lock().rollbacks.clone()
    }

    /// Slots reserved and not yet retired.
    pub fn outstanding(&self) -> usize {
        self.state.lock().outstanding.len()
    }

    /// Mark `slot` as consumed by hardware.
    pub fn retire(&self, slot: u32) {
        self.state.lock().outstanding.remove(&slot);
    }
}

impl StreamRing for SimRing {
    fn stream_id(&self) -> u32 {
        self.stream_id
    }

    fn sq_id(&self) -> u16 {
        self.sq_id
    }

    fn wr_cqe(&self) -> bool {
        true
    }

    fn exec_times_addr(&self) -> u64 {
        EXEC_TIMES_BASE + u64::from(self.stream_id) * 0x40
    }

    fn check_can_send(&self) -> Result<()> {
        if self.state.lock().fail_can_send {
            return Err(driver_err("check_can_send", -libc::EPIPE));
        }
        Ok(())
    }

    fn alloc_slot(&self) -> Result<u32> {
        let mut state = self.state.lock();
        let slot = state.tail % self.depth;
        if state.outstanding.contains(&slot) {
            return Err(DqsError::RingFull {
                stream_id: self.stream_id,
            });
        }
        state.outstanding.insert(slot);
        state.tail = state.tail.wrapping_add(1);
        Ok(slot)
    }

    fn rollback_slot(&self, slot: u32) {
        let mut state = self.state.lock();
        state.outstanding.remove(&slot);
        if state.tail.wrapping_sub(1) % self.depth == slot {
            state.tail = state.tail.wrapping_sub(1);
        }
        state.rollbacks.push(slot);
    }

    fn submit(&self, slot: u32, sqe: &Sqe) -> Result<()> {
        let mut state = self.state.lock();
        if state.fail_submit {
            return Err(driver_err("submit", -libc::EIO));
        }
        state.submitted.push((slot, *sqe));
        Ok(())
    }

    fn arm_notify_wait(&self, request: &NotifyWaitRequest) -> Result<()> {
        let mut state = self.state.lock();
        if state.fail_wait {
            return Err(driver_err("notify_wait", -libc::EIO));
        }
        state.waits.push(*request);
        Ok(())
    }
}

// ============================================================================
// Platform
// ============================================================================

/// Kernel, device and context wired together.
pub struct SimPlatform {
    /// Simulated control node.
    pub kernel: Arc<SimKernel>,
    /// Simulated device.
    pub device: Arc<SimDevice>,
    /// Context wired to `kernel` and `device`.
    pub context: Arc<DqsContext>,
}

impl Default for SimPlatform {
    fn default() -> Self {
        Self::new()
    }
}

impl SimPlatform {
    /// Platform with the default configuration.
    pub fn new() -> Self {
        Self::with_config(RuntimeConfig::default())
    }

    /// Platform with `config`; device ids come from its `device` section.
    pub fn with_config(config: RuntimeConfig) -> Self {
        let kernel = Arc::new(SimKernel::new());
        let device = Arc::new(SimDevice::with_ids(config.device.device_id, config.device.ts_id));
        let context = Arc::new(DqsContext::new(kernel.clone(), device.clone(), config));
        Self {
            kernel,
            device,
            context,
        }
    }

    /// Queue binding service of the platform's context.
    pub fn queue_service(&self) -> QueueBindingService<'_> {
        self.context.queues()
    }

    /// A DQS stream on a fresh ring whose SQ id equals `stream_id`.
    pub fn stream(&self, stream_id: u32) -> (StreamWithDqs, Arc<SimRing>) {
        let ring = Arc::new(SimRing::new(stream_id, stream_id as u16));
        (StreamWithDqs::new(self.context.clone(), ring.clone()), ring)
    }

    /// Register a GQM-backed input queue.
    pub fn add_input_queue(&self, queue_id: u32) {
        let regs = 0x4_0000_0000 + u64::from(queue_id) * 0x100;
        self.device.add_queue(DqsQueueInfo {
            queue_id,
            que_type: QueueEntityType::Gqm as u32,
            dequeue_op_addr: regs,
            prodq_stat_addr: regs + 0x10,
            ..Default::default()
        });
    }

    /// Register a QMNGR-backed output queue whose pool is `pool_id`.
    pub fn add_output_queue(&self, queue_id: u32, pool_id: u32) {
        let regs = 0x5_0000_0000 + u64::from(queue_id) * 0x100;
        self.device.add_queue(DqsQueueInfo {
            queue_id,
            que_type: QueueEntityType::Qmngr as u32,
            enqueue_op_addr: regs,
            prodq_ow_addr: regs + 8,
            prodq_stat_addr: regs + 0x10,
            ..Default::default()
        });

        let pool = u64::from(pool_id);
        let data_base = 0x6_0000_0000 + pool * 0x10_0000;
        let head_base = 0x7_0000_0000 + pool * 0x1_0000;
        let alloc_addr = 0x8_0000_0000 + pool * 0x100;
        self.device.add_pool(DqsPoolInfo {
            pool_id,
            data_pool_base_addr: data_base,
            data_pool_blk_size: 4096,
            data_pool_obj_size: 4096,
            head_pool_base_addr: head_base,
            head_pool_blk_size: 256,
            head_pool_obj_size: 256,
            alloc_op_addr: alloc_addr,
            free_op_addr: alloc_addr + 8,
            ..Default::default()
        });
        self.kernel.add_pool_binding(MbufPoolBindItem {
            queue_id,
            pool_id,
            head_block_size: 256,
            data_block_size: 4096,
            head_base_addr: head_base,
            data_base_addr: data_base,
            alloc_addr,
            free_addr: alloc_addr + 8,
            ..Default::default()
        });
    }
}

//! Device memory for function-call programs.

use tracing::{debug, error, warn};

use crate::config::FuncCallConfig;
use crate::driver::{DeviceDriver, MemcpyKind};
use crate::error::{DqsError, Result};

/// One program allocation: `[pad][program][dfx]`.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct FuncCallMem {
    base: u64,
    usable: u64,
    dfx: u64,
    size: u64,
}

impl FuncCallMem {
    /// Whether device memory is held.
    pub fn is_allocated(&self) -> bool {
        self.base != 0
    }

    /// Raw allocation returned by the driver.
    pub fn base(&self) -> u64 {
        self.base
    }

    /// Aligned program start.
    pub fn usable(&self) -> u64 {
        self.usable
    }

    /// Diagnostic trailer, right after the program.
    pub fn dfx(&self) -> u64 {
        self.dfx
    }

    /// Program size in bytes.
    pub fn size(&self) -> u64 {
        self.size
    }
}

/// Allocates, fills and frees [`FuncCallMem`].
pub struct FunctionCallBuilder<'a> {
    driver: &'a dyn DeviceDriver,
    dfx_size: u64,
    align: u64,
}

impl<'a> FunctionCallBuilder<'a> {
    /// Builder over `driver` using the sizing rules of `config`.
    pub fn new(driver: &'a dyn DeviceDriver, config: &FuncCallConfig) -> Self {
        Self {
            driver,
            dfx_size: config.dfx_size,
            align: config.instr_align,
        }
    }

    /// Size of the diagnostic trailer appended to every program.
    pub fn dfx_size(&self) -> u64 {
        self.dfx_size
    }

    /// Reserve room for a `size`-byte program plus the DFX trailer.
    pub fn allocate(&self, size: u64) -> Result<FuncCallMem> {
        let alloc_size = size + self.dfx_size + self.align;
        let device_id = self.driver.device_id();
        let base = self.driver.mem_alloc(alloc_size).map_err(|e| {
            error!(device_id, size = alloc_size, error = %e, "function call memory allocation failed");
            DqsError::OutOfDeviceMemory {
                size: alloc_size,
                device_id,
            }
        })?;
        let usable = align_up(base, self.align);
        let mem = FuncCallMem {
            base,
            usable,
            dfx: usable + size,
            size,
        };
        debug!(base = format_args!("{base:#x}"), usable = format_args!("{usable:#x}"), size, "function call memory allocated");
        Ok(mem)
    }

    /// Release the allocation; a second call is a no-op.
    pub fn free(&self, mem: &mut FuncCallMem) {
        if !mem.is_allocated() {
            return;
        }
        if let Err(e) = self.driver.mem_free(mem.base) {
            warn!(base = format_args!("{:#x}", mem.base), error = %e, "function call memory free failed");
        }
        *mem = FuncCallMem::default();
    }

    /// Copy `words` to the program area and clear the DFX trailer.
    pub fn load(&self, mem: &FuncCallMem, words: &[u32], kind: MemcpyKind) -> Result<()> {
        let program_len = words.len() as u64 * 4;
        if program_len > mem.size {
            return Err(DqsError::invalid(format!(
                "program of {program_len} bytes exceeds reserved {} bytes",
                mem.size
            )));
        }
        let mut bytes: Vec<u8> = words.iter().flat_map(|w| w.to_le_bytes()).collect();
        bytes.resize((mem.size + self.dfx_size) as usize, 0);
        self.driver.copy_to_device(mem.usable, &bytes, kind)
    }

    /// Assemble a program that embeds its own DFX address, then load it.
    ///
    /// `assemble` is called once with a placeholder to size the allocation
    /// and again with the real DFX address. The result is stored in `slot`
    /// as soon as it is allocated so a later failure is released by the
    /// caller's cleanup.
    pub fn build(
        &self,
        slot: &mut FuncCallMem,
        kind: MemcpyKind,
        assemble: impl Fn(u64) -> Result<Vec<u32>>,
    ) -> Result<()> {
        let sizing = assemble(0)?;
        *slot = self.allocate(sizing.len() as u64 * 4)?;
        let words = assemble(slot.dfx)?;
        if let Err(e) = self.load(slot, &words, kind) {
            self.free(slot);
            return Err(e);
        }
        tracing::trace!(usable = format_args!("{:#x}", slot.usable), words = ?words, "function call program loaded");
        Ok(())
    }
}

fn align_up(addr: u64, align: u64) -> u64 {
    if addr & (align - 1) == 0 {
        addr
    } else {
        (addr | (align - 1)) + 1
    }
}

//! Execution context
//!
//! One running instance of a [`PluginImage`]. Memory layout, in local
//! addresses:
//!
//! ```text
//! 0          heapbase         hp                sp           memory_size
//! ├──────────┼────────────────┼─────────────────┼────────────┤
//! │   data   │ heap (grows →) │  no-man's land  │ (← grows) stack │
//! ```
//!
//! `heapbase <= hp <= sp <= memory_size` holds at all times. Addresses in
//! `[hp, sp)` do not translate.

use std::sync::Arc;

use smx_config::{ContextConfig, Stage};
use smx_log::{debug, trace, Logger};

use crate::error::{Cell, Result, SmxError, CELL_SIZE};
use crate::image::PluginImage;

/// Bytes always kept free between the heap and the stack
pub const STACK_MARGIN: Cell = 16 * CELL_SIZE as Cell;

const CELL: Cell = CELL_SIZE as Cell;

/// Host function callable from plugin code
pub type NativeFn = fn(&mut PluginContext, &[Cell]) -> Result<Cell>;

/// Name/function pair handed to [`PluginContext::bind_natives`]
#[derive(Clone, Copy)]
pub struct NativeInfo<'a> {
    pub name: &'a str,
    pub func: NativeFn,
}

impl<'a> NativeInfo<'a> {
    pub fn new(name: &'a str, func: NativeFn) -> Self {
        Self { name, func }
    }
}

/// Binding state of a native slot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NativeStatus {
    Unbound,
    /// Filled by a catch-all binding; a specific bind may replace it
    Pending,
    Bound,
}

#[derive(Clone, Copy)]
struct NativeSlot {
    status: NativeStatus,
    func: Option<NativeFn>,
}

/// The interpreter seam: runs bytecode starting at a code offset
pub trait CodeRunner {
    fn run(&mut self, ctx: &mut PluginContext, code_offset: u32) -> Result<Cell>;
}

impl<F> CodeRunner for F
where
    F: FnMut(&mut PluginContext, u32) -> Result<Cell>,
{
    fn run(&mut self, ctx: &mut PluginContext, code_offset: u32) -> Result<Cell> {
        self(ctx, code_offset)
    }
}

/// Per-instance memory, cursors and native bindings
pub struct PluginContext {
    image: Arc<PluginImage>,
    memory: Vec<u8>,
    heapbase: Cell,
    hp: Cell,
    sp: Cell,
    pushcount: Cell,
    /// Header addresses of live heap blocks, oldest first
    heap_blocks: Vec<Cell>,
    /// Nesting depth of `execute` calls in progress
    exec_depth: u32,
    natives: Vec<NativeSlot>,
    logger: Arc<Logger>,
}

impl std::fmt::Debug for PluginContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginContext")
            .field("memory_size", &self.memory.len())
            .field("heapbase", &self.heapbase)
            .field("hp", &self.hp)
            .field("sp", &self.sp)
            .field("pushcount", &self.pushcount)
            .field("exec_depth", &self.exec_depth)
            .field("natives", &self.natives.len())
            .finish()
    }
}

impl PluginContext {
    pub fn new(image: Arc<PluginImage>) -> Result<Self> {
        Self::with_config(image, &ContextConfig::default(), Logger::noop())
    }

    /// Allocates the context memory and copies the data segment in
    pub fn with_config(
        image: Arc<PluginImage>,
        config: &ContextConfig,
        logger: Arc<Logger>,
    ) -> Result<Self> {
        let datasize = image.datasize() as u64;
        let memory_size = (image.memsize() as u64).max(datasize + config.min_heap_size as u64);
        if memory_size > i32::MAX as u64 {
            return Err(SmxError::Param(format!(
                "memory size {memory_size} does not fit in a cell"
            )));
        }

        let mut memory = vec![0u8; memory_size as usize];
        memory[..image.data().len()].copy_from_slice(image.data());

        let natives = vec![
            NativeSlot {
                status: NativeStatus::Unbound,
                func: None,
            };
            image.num_natives()
        ];

        debug!(
            logger,
            target: Stage::Context.target(),
            "context created: memory {} bytes, heapbase {}, {} natives",
            memory_size,
            datasize,
            natives.len()
        );

        Ok(Self {
            image,
            memory,
            heapbase: datasize as Cell,
            hp: datasize as Cell,
            sp: memory_size as Cell,
            pushcount: 0,
            heap_blocks: Vec::new(),
            exec_depth: 0,
            natives,
            logger,
        })
    }

    pub fn image(&self) -> &Arc<PluginImage> {
        &self.image
    }

    pub fn memory(&self) -> &[u8] {
        &self.memory
    }

    pub fn memory_size(&self) -> Cell {
        self.memory.len() as Cell
    }

    pub fn heapbase(&self) -> Cell {
        self.heapbase
    }

    pub fn hp(&self) -> Cell {
        self.hp
    }

    pub fn sp(&self) -> Cell {
        self.sp
    }

    /// Arguments pushed since the last frame boundary
    pub fn pushcount(&self) -> Cell {
        self.pushcount
    }

    /// Whether a call through [`execute`](Self::execute) is running
    pub fn is_in_exec(&self) -> bool {
        self.exec_depth > 0
    }

    pub fn exec_depth(&self) -> u32 {
        self.exec_depth
    }

    fn refuse(&self, err: SmxError) -> SmxError {
        trace!(
            self.logger,
            target: Stage::Context.target(),
            "refused: {} (hp {}, sp {})",
            err,
            self.hp,
            self.sp
        );
        err
    }

    // ---- Heap ----

    /// Allocates `cells` cells on the heap and returns the payload's local
    /// address. A size header occupies the cell just below it.
    pub fn heap_alloc(&mut self, cells: usize) -> Result<Cell> {
        let bytes = (cells as u64).saturating_mul(CELL_SIZE as u64);
        let free = (self.sp - self.hp) as i64;
        // The size header counts against the margin too
        if bytes > i32::MAX as u64 || free - (bytes as i64 + CELL as i64) < STACK_MARGIN as i64 {
            return Err(self.refuse(SmxError::HeapLow));
        }

        let header = self.hp;
        self.store(header, cells as Cell);
        let addr = header + CELL;
        self.hp = addr + bytes as Cell;
        self.heap_blocks.push(header);

        trace!(
            self.logger,
            target: Stage::Context.target(),
            "heap alloc {} cells at {}, hp {}",
            cells,
            addr,
            self.hp
        );
        Ok(addr)
    }

    /// Frees the most recent allocation. Popping anything else is an
    /// `InvalidAddress` error.
    pub fn heap_pop(&mut self, addr: Cell) -> Result<()> {
        let header = addr.wrapping_sub(CELL);
        if header < self.heapbase || header >= self.sp || header > self.hp - CELL {
            return Err(self.refuse(SmxError::InvalidAddress(addr)));
        }

        let cells = self.load(header) as i64;
        let expected = self.hp as i64 - cells * CELL as i64 - CELL as i64;
        if expected != header as i64 || self.heap_blocks.last() != Some(&header) {
            return Err(self.refuse(SmxError::InvalidAddress(addr)));
        }

        self.heap_blocks.pop();
        self.hp = header;
        Ok(())
    }

    /// Frees `addr` and everything allocated after it, in any order.
    ///
    /// Blocks allocated before `addr` stay poppable; blocks released this
    /// way can no longer be popped.
    pub fn heap_release(&mut self, addr: Cell) -> Result<()> {
        let header = addr.wrapping_sub(CELL);
        if addr < self.heapbase || header < self.heapbase || header > self.hp {
            return Err(self.refuse(SmxError::InvalidAddress(addr)));
        }
        self.set_hp(header);
        Ok(())
    }

    fn set_hp(&mut self, hp: Cell) {
        self.hp = hp;
        while self.heap_blocks.last().is_some_and(|&h| h >= hp) {
            self.heap_blocks.pop();
        }
    }

    // ---- Stack ----

    pub fn push_cell(&mut self, value: Cell) -> Result<()> {
        if self.hp as i64 + STACK_MARGIN as i64 > self.sp as i64 - CELL as i64 {
            return Err(self.refuse(SmxError::HeapLow));
        }

        self.sp -= CELL;
        self.store(self.sp, value);
        self.pushcount += 1;
        Ok(())
    }

    /// Pushes every value; on failure nothing stays pushed
    pub fn push_cells_from_array(&mut self, values: &[Cell]) -> Result<()> {
        for (pushed, &value) in values.iter().enumerate() {
            if let Err(e) = self.push_cell(value) {
                self.sp += pushed as Cell * CELL;
                self.pushcount -= pushed as Cell;
                return Err(e);
            }
        }
        Ok(())
    }

    /// Copies `values` to a new heap block and pushes its address.
    /// Returns the block's local address.
    pub fn push_cell_array(&mut self, values: &[Cell]) -> Result<Cell> {
        let addr = self.heap_alloc(values.len())?;
        for (i, &value) in values.iter().enumerate() {
            self.store(addr + i as Cell * CELL, value);
        }
        self.push_heap_block(addr)
    }

    /// Copies a string to a new heap block, one character per cell plus a
    /// terminating zero, and pushes its address
    pub fn push_string(&mut self, s: &str) -> Result<Cell> {
        let bytes = until_nul(s.as_bytes());
        let addr = self.heap_alloc(bytes.len() + 1)?;
        for (i, &byte) in bytes.iter().enumerate() {
            self.store(addr + i as Cell * CELL, byte as Cell);
        }
        self.store(addr + bytes.len() as Cell * CELL, 0);
        self.push_heap_block(addr)
    }

    fn push_heap_block(&mut self, addr: Cell) -> Result<Cell> {
        if let Err(e) = self.push_cell(addr) {
            self.heap_release(addr)?;
            return Err(e);
        }
        Ok(addr)
    }

    /// Drops every argument pushed since the last frame boundary
    pub fn discard_pushed(&mut self) {
        self.sp += self.pushcount * CELL;
        self.pushcount = 0;
    }

    // ---- Address translation ----

    pub fn is_valid_address(&self, addr: Cell) -> bool {
        addr >= 0 && addr < self.memory_size() && !(addr >= self.hp && addr < self.sp)
    }

    /// Physical memory starting at `addr`
    pub fn local_to_phys(&self, addr: Cell) -> Result<&[u8]> {
        let offset = self.translate(addr)?;
        Ok(&self.memory[offset..])
    }

    pub fn local_to_phys_mut(&mut self, addr: Cell) -> Result<&mut [u8]> {
        let offset = self.translate(addr)?;
        Ok(&mut self.memory[offset..])
    }

    fn translate(&self, addr: Cell) -> Result<usize> {
        if !self.is_valid_address(addr) {
            return Err(self.refuse(SmxError::InvalidAddress(addr)));
        }
        Ok(addr as usize)
    }

    /// Translates a whole cell, so it cannot straddle the gap or the end
    fn translate_cell(&self, addr: Cell) -> Result<usize> {
        let last = addr.checked_add(CELL - 1).ok_or(SmxError::InvalidAddress(addr))?;
        self.translate(last)?;
        self.translate(addr)
    }

    // ---- Cell access ----

    pub fn read_cell(&self, addr: Cell) -> Result<Cell> {
        let offset = self.translate_cell(addr)?;
        Ok(self.load_at(offset))
    }

    pub fn write_cell(&mut self, addr: Cell, value: Cell) -> Result<()> {
        let offset = self.translate_cell(addr)?;
        self.store_at(offset, value);
        Ok(())
    }

    pub fn read_cells(&self, addr: Cell, count: usize) -> Result<Vec<Cell>> {
        (0..count)
            .map(|i| self.read_cell(cell_offset(addr, i)?))
            .collect()
    }

    pub fn write_cells(&mut self, addr: Cell, values: &[Cell]) -> Result<()> {
        // Check the whole range before touching memory
        for i in 0..values.len() {
            self.translate_cell(cell_offset(addr, i)?)?;
        }
        for (i, &value) in values.iter().enumerate() {
            self.write_cell(cell_offset(addr, i)?, value)?;
        }
        Ok(())
    }

    // ---- Strings ----

    /// Reads a cell string into `buffer`: one byte per cell, stopping at a
    /// zero cell or when `buffer` has one byte left. The output is always
    /// NUL-terminated. Returns the number of bytes before the terminator.
    pub fn local_to_string_buf(&self, addr: Cell, buffer: &mut [u8]) -> Result<usize> {
        if buffer.is_empty() {
            return Err(SmxError::Param("string buffer has no room".to_string()));
        }
        self.translate(addr)?;

        let max = buffer.len() - 1;
        let mut len = 0;
        while len < max {
            let value = self.read_cell(cell_offset(addr, len)?)?;
            if value == 0 {
                break;
            }
            buffer[len] = value as u8;
            len += 1;
        }
        buffer[len] = 0;
        Ok(len)
    }

    /// Reads a cell string of at most `maxlength - 1` characters
    pub fn local_to_string(&self, addr: Cell, maxlength: usize) -> Result<String> {
        let mut buffer = vec![0u8; maxlength];
        let len = self.local_to_string_buf(addr, &mut buffer)?;
        Ok(String::from_utf8_lossy(&buffer[..len]).into_owned())
    }

    /// Writes `s` at `addr`, one byte per cell, truncated to `chars - 1`
    /// characters and terminated by a zero cell. Returns the characters
    /// written.
    pub fn string_to_local(&mut self, addr: Cell, chars: usize, s: &str) -> Result<usize> {
        if chars == 0 {
            return Err(SmxError::Param("destination holds no characters".to_string()));
        }

        let bytes = until_nul(s.as_bytes());
        let len = bytes.len().min(chars - 1);
        self.write_string_cells(addr, &bytes[..len])?;
        Ok(len)
    }

    /// Like [`string_to_local`](Self::string_to_local), but never splits a
    /// multi-byte UTF-8 sequence: the copy is cut back to the last whole
    /// character that fits in `maxbytes - 1` bytes. Returns the bytes written.
    pub fn string_to_local_utf8(&mut self, addr: Cell, maxbytes: usize, s: &str) -> Result<usize> {
        if maxbytes == 0 {
            return Err(SmxError::Param("destination holds no characters".to_string()));
        }

        let s = &s[..until_nul(s.as_bytes()).len()];
        let mut len = s.len().min(maxbytes - 1);
        while !s.is_char_boundary(len) {
            len -= 1;
        }
        self.write_string_cells(addr, &s.as_bytes()[..len])?;
        Ok(len)
    }

    fn write_string_cells(&mut self, addr: Cell, bytes: &[u8]) -> Result<()> {
        let mut cells: Vec<Cell> = bytes.iter().map(|&b| b as Cell).collect();
        cells.push(0);
        self.write_cells(addr, &cells)
    }

    // ---- Symbols ----

    pub fn find_native_by_name(&self, name: &str) -> Result<usize> {
        self.image.find_native_by_name(name)
    }

    pub fn find_public_by_name(&self, name: &str) -> Result<usize> {
        self.image.find_public_by_name(name)
    }

    pub fn find_pubvar_by_name(&self, name: &str) -> Result<usize> {
        self.image.find_pubvar_by_name(name)
    }

    /// Local address of a pubvar and its offset in [`memory`](Self::memory)
    pub fn get_pubvar_addrs(&self, index: usize) -> Result<(Cell, usize)> {
        let pubvar = self.image.get_pubvar(index)?;
        let addr = Cell::try_from(pubvar.address)
            .map_err(|_| SmxError::InvalidAddress(Cell::MAX))?;
        let offset = self.translate(addr)?;
        Ok((addr, offset))
    }

    pub fn native_status(&self, index: usize) -> Result<NativeStatus> {
        self.slot(index).map(|slot| slot.status)
    }

    fn slot(&self, index: usize) -> Result<&NativeSlot> {
        self.natives.get(index).ok_or(SmxError::Index {
            index,
            len: self.natives.len(),
        })
    }

    /// Binds each listed native the plugin imports. `Bound` slots are only
    /// replaced when `overwrite` is set. Returns how many slots were bound.
    pub fn bind_natives(&mut self, natives: &[NativeInfo<'_>], overwrite: bool) -> usize {
        let mut bound = 0;
        for native in natives {
            if let Ok(index) = self.image.find_native_by_name(native.name) {
                if self.bind_slot(index, native.func, overwrite) {
                    bound += 1;
                }
            }
        }
        debug!(
            self.logger,
            target: Stage::Context.target(),
            "bound {} of {} offered natives",
            bound,
            natives.len()
        );
        bound
    }

    /// Binds one slot by index. Returns whether the slot changed.
    pub fn bind_native(&mut self, index: usize, func: NativeFn, overwrite: bool) -> Result<bool> {
        self.slot(index)?;
        Ok(self.bind_slot(index, func, overwrite))
    }

    fn bind_slot(&mut self, index: usize, func: NativeFn, overwrite: bool) -> bool {
        let slot = &mut self.natives[index];
        if slot.status == NativeStatus::Bound && !overwrite {
            return false;
        }
        slot.status = NativeStatus::Bound;
        slot.func = Some(func);
        true
    }

    /// Points every slot that is not `Bound` at `func`, marking it `Pending`
    pub fn bind_native_to_any(&mut self, func: NativeFn) {
        for slot in &mut self.natives {
            if slot.status != NativeStatus::Bound {
                slot.status = NativeStatus::Pending;
                slot.func = Some(func);
            }
        }
    }

    /// Names of natives with no function attached
    pub fn unbound_natives(&self) -> Vec<&str> {
        self.natives
            .iter()
            .zip(self.image.natives().iter())
            .filter(|(slot, _)| slot.status == NativeStatus::Unbound)
            .map(|(_, decl)| decl.name.as_str())
            .collect()
    }

    /// Calls a native with the given parameters
    pub fn invoke_native(&mut self, index: usize, params: &[Cell]) -> Result<Cell> {
        let slot = *self.slot(index)?;
        match (slot.status, slot.func) {
            (NativeStatus::Bound | NativeStatus::Pending, Some(func)) => func(self, params),
            _ => {
                let name = self.image.get_native(index)?.name.clone();
                Err(SmxError::InvalidNative(name))
            }
        }
    }

    // ---- Calls ----

    /// Calls a public function with the arguments pushed so far.
    ///
    /// The argument count is pushed, the runner executes the function, and
    /// the stack is unwound past the arguments whatever the outcome. A
    /// successful run that leaves `sp` or `hp` moved is reported as a leak.
    /// Heap blocks from `push_string`/`push_cell_array` stay allocated, even
    /// if the runner popped or released them.
    pub fn execute(&mut self, public_index: usize, runner: &mut dyn CodeRunner) -> Result<Cell> {
        let code_offset = self.image.get_public(public_index)?.code_offset;

        let argc = self.pushcount;
        self.push_cell(argc)?;
        self.pushcount = 0;

        let save_sp = self.sp;
        let save_hp = self.hp;
        let save_blocks: Vec<(Cell, Cell)> = self
            .heap_blocks
            .iter()
            .map(|&header| (header, self.load(header)))
            .collect();

        trace!(
            self.logger,
            target: Stage::Context.target(),
            "execute public {} at {} with {} args",
            public_index,
            code_offset,
            argc
        );

        self.exec_depth += 1;
        let outcome = runner.run(self, code_offset);
        self.exec_depth -= 1;

        let result = outcome.and_then(|value| {
            if self.sp != save_sp {
                Err(SmxError::StackLeak {
                    sp: self.sp,
                    expected: save_sp,
                })
            } else if self.hp != save_hp {
                Err(SmxError::HeapLeak {
                    hp: self.hp,
                    expected: save_hp,
                })
            } else {
                Ok(value)
            }
        });

        self.restore_heap(save_hp, save_blocks);
        self.sp = save_sp + (argc + 1) * CELL;
        self.pushcount = 0;
        result
    }

    /// Puts the heap back to a frame's entry state, size headers included
    fn restore_heap(&mut self, hp: Cell, blocks: Vec<(Cell, Cell)>) {
        self.heap_blocks.clear();
        for (header, cells) in blocks {
            self.store(header, cells);
            self.heap_blocks.push(header);
        }
        self.hp = hp;
    }

    // ---- Raw memory, addresses already validated ----

    fn load(&self, addr: Cell) -> Cell {
        self.load_at(addr as usize)
    }

    fn store(&mut self, addr: Cell, value: Cell) {
        self.store_at(addr as usize, value);
    }

    fn load_at(&self, offset: usize) -> Cell {
        let mut bytes = [0u8; CELL_SIZE];
        bytes.copy_from_slice(&self.memory[offset..offset + CELL_SIZE]);
        Cell::from_le_bytes(bytes)
    }

    fn store_at(&mut self, offset: usize, value: Cell) {
        self.memory[offset..offset + CELL_SIZE].copy_from_slice(&value.to_le_bytes());
    }
}

fn cell_offset(addr: Cell, index: usize) -> Result<Cell> {
    Cell::try_from(index)
        .ok()
        .and_then(|i| i.checked_mul(CELL))
        .and_then(|delta| addr.checked_add(delta))
        .ok_or(SmxError::InvalidAddress(addr))
}

fn until_nul(bytes: &[u8]) -> &[u8] {
    let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
    &bytes[..end]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assembler::PluginAssembler;
    use smx_config::WriteConfig;
    use smx_log::{Level, LogRingBuffer};

    fn image(datasize: usize, memsize: u32) -> Arc<PluginImage> {
        let mut asm = PluginAssembler::new();
        asm.set_code(vec![0; 16], 1);
        asm.set_data((0..datasize).map(|i| i as u8).collect(), memsize);
        asm.add_public("OnPluginStart", 0);
        asm.add_native("Foo");
        asm.add_native("Bar");
        asm.add_pubvar("g_Version", 8);
        let bytes = asm.encode(&WriteConfig::uncompressed()).unwrap();
        Arc::new(PluginImage::from_bytes(&bytes).unwrap())
    }

    fn context() -> PluginContext {
        PluginContext::new(image(100, 1000)).unwrap()
    }

    fn native_one(_: &mut PluginContext, _: &[Cell]) -> Result<Cell> {
        Ok(1)
    }

    fn native_two(_: &mut PluginContext, _: &[Cell]) -> Result<Cell> {
        Ok(2)
    }

    fn native_sum(_: &mut PluginContext, params: &[Cell]) -> Result<Cell> {
        Ok(params.iter().sum())
    }

    #[test]
    fn test_initial_layout() {
        let ctx = context();
        assert_eq!(ctx.memory_size(), 1000);
        assert_eq!(ctx.heapbase(), 100);
        assert_eq!(ctx.hp(), 100);
        assert_eq!(ctx.sp(), 1000);
        assert_eq!(ctx.memory()[..4], [0, 1, 2, 3]);
        assert!(ctx.memory()[100..].iter().all(|&b| b == 0));
    }

    #[test]
    fn test_min_heap_size_grows_memory() {
        let config = ContextConfig { min_heap_size: 4096 };
        let ctx = PluginContext::with_config(image(100, 1000), &config, Logger::noop()).unwrap();
        assert_eq!(ctx.memory_size(), 4196);
    }

    #[test]
    fn test_heap_alloc_and_pop() {
        let mut ctx = context();
        let a = ctx.heap_alloc(10).unwrap();
        assert_eq!(a, 104);
        assert_eq!(ctx.hp(), 144);
        assert_eq!(ctx.read_cell(100).unwrap(), 10);
        assert!(ctx.local_to_phys(a).is_ok());

        ctx.heap_pop(a).unwrap();
        assert_eq!(ctx.hp(), 100);
        assert!(matches!(ctx.heap_pop(a), Err(SmxError::InvalidAddress(_))));
    }

    #[test]
    fn test_heap_pop_out_of_order() {
        let mut ctx = context();
        let a = ctx.heap_alloc(2).unwrap();
        let b = ctx.heap_alloc(3).unwrap();
        assert!(matches!(ctx.heap_pop(a), Err(SmxError::InvalidAddress(_))));
        ctx.heap_pop(b).unwrap();
        ctx.heap_pop(a).unwrap();
        assert_eq!(ctx.hp(), ctx.heapbase());
    }

    #[test]
    fn test_heap_low() {
        let mut ctx = context();
        // 900 bytes free, 64 kept as margin: 836 bytes = 208 cells plus header
        assert!(matches!(ctx.heap_alloc(209), Err(SmxError::HeapLow)));
        let a = ctx.heap_alloc(208).unwrap();
        assert_eq!(ctx.sp() - ctx.hp(), STACK_MARGIN);
        ctx.heap_pop(a).unwrap();
        assert!(matches!(ctx.heap_alloc(usize::MAX), Err(SmxError::HeapLow)));
    }

    #[test]
    fn test_heap_release_frees_chain() {
        let mut ctx = context();
        let keep = ctx.heap_alloc(1).unwrap();
        let a = ctx.heap_alloc(4).unwrap();
        let _b = ctx.heap_alloc(4).unwrap();
        ctx.heap_release(a).unwrap();
        assert_eq!(ctx.hp(), a - 4);

        ctx.heap_pop(keep).unwrap();
        assert_eq!(ctx.hp(), ctx.heapbase());
    }

    #[test]
    fn test_pop_after_release_in_middle_rejected() {
        let mut ctx = context();
        let a = ctx.heap_alloc(2).unwrap();
        let b = ctx.heap_alloc(1).unwrap();
        // Release from inside `a`, then allocate over it
        ctx.heap_release(a + 4).unwrap();
        let c = ctx.heap_alloc(1).unwrap();
        assert!(ctx.heap_pop(b).is_err());
        assert!(ctx.heap_pop(a).is_err());
        ctx.heap_pop(c).unwrap();
    }

    #[test]
    fn test_heap_release_below_heapbase() {
        let mut ctx = context();
        assert!(ctx.heap_release(50).is_err());
        assert!(ctx.heap_release(ctx.hp() + 8).is_err());
    }

    #[test]
    fn test_push_cell() {
        let mut ctx = context();
        ctx.push_cell(7).unwrap();
        ctx.push_cell(8).unwrap();
        assert_eq!(ctx.sp(), 992);
        assert_eq!(ctx.pushcount(), 2);
        assert_eq!(ctx.read_cell(992).unwrap(), 8);
        assert_eq!(ctx.read_cell(996).unwrap(), 7);

        ctx.discard_pushed();
        assert_eq!(ctx.sp(), 1000);
        assert_eq!(ctx.pushcount(), 0);
    }

    #[test]
    fn test_push_cells_rewinds_on_failure() {
        let mut ctx = context();
        // Leave room for exactly three pushes
        ctx.heap_alloc(((900 - STACK_MARGIN - 12) / 4 - 1) as usize).unwrap();
        let sp = ctx.sp();

        assert!(matches!(
            ctx.push_cells_from_array(&[1, 2, 3, 4]),
            Err(SmxError::HeapLow)
        ));
        assert_eq!(ctx.sp(), sp);
        assert_eq!(ctx.pushcount(), 0);

        ctx.push_cells_from_array(&[1, 2, 3]).unwrap();
        assert_eq!(ctx.pushcount(), 3);
    }

    #[test]
    fn test_push_string() {
        let mut ctx = context();
        let hp = ctx.hp();
        let addr = ctx.push_string("hi").unwrap();

        assert_eq!(ctx.read_cell(addr - 4).unwrap(), 3);
        assert_eq!(ctx.read_cells(addr, 3).unwrap(), vec!['h' as Cell, 'i' as Cell, 0]);
        assert_eq!(ctx.hp(), hp + 4 + 12);
        assert_eq!(ctx.local_to_string(addr, 256).unwrap(), "hi");
        assert_eq!(ctx.read_cell(ctx.sp()).unwrap(), addr);
        assert_eq!(ctx.pushcount(), 1);
    }

    #[test]
    fn test_push_cell_array() {
        let mut ctx = context();
        let addr = ctx.push_cell_array(&[5, -6, 7]).unwrap();
        assert_eq!(ctx.read_cells(addr, 3).unwrap(), vec![5, -6, 7]);
        assert_eq!(ctx.read_cell(ctx.sp()).unwrap(), addr);
    }

    #[test]
    fn test_push_string_releases_heap_on_failure() {
        let mut ctx = context();
        // Leave room for a two-cell block but not for the push after it
        let filler = ctx.heap_alloc(((900 - STACK_MARGIN) / 4 - 4) as usize).unwrap();
        let hp = ctx.hp();

        assert!(matches!(ctx.push_string("x"), Err(SmxError::HeapLow)));
        assert_eq!(ctx.hp(), hp);
        ctx.heap_pop(filler).unwrap();
    }

    #[test]
    fn test_address_validity() {
        let mut ctx = context();
        ctx.heap_alloc(4).unwrap();
        ctx.push_cell(1).unwrap();
        let (hp, sp) = (ctx.hp(), ctx.sp());

        for addr in [-1, hp, sp - 1, ctx.memory_size(), Cell::MAX, Cell::MIN] {
            assert!(!ctx.is_valid_address(addr), "{addr} should be invalid");
            assert!(matches!(
                ctx.local_to_phys(addr),
                Err(SmxError::InvalidAddress(_))
            ));
        }
        for addr in [0, hp - 1, sp, ctx.memory_size() - 1] {
            let phys = ctx.local_to_phys(addr).unwrap();
            assert_eq!(phys.as_ptr(), ctx.memory()[addr as usize..].as_ptr());
        }
    }

    #[test]
    fn test_cell_straddling_gap_rejected() {
        let ctx = context();
        assert!(ctx.read_cell(ctx.hp() - 2).is_err());
        assert!(ctx.read_cell(ctx.memory_size() - 2).is_err());
        assert!(ctx.read_cell(ctx.hp() - 4).is_ok());
    }

    #[test]
    fn test_write_cells_is_all_or_nothing() {
        let mut ctx = context();
        let start = ctx.hp() - 8;
        assert!(ctx.write_cells(start, &[1, 2, 3]).is_err());
        assert_eq!(ctx.read_cells(start, 2).unwrap(), vec![
            Cell::from_le_bytes([92, 93, 94, 95]),
            Cell::from_le_bytes([96, 97, 98, 99]),
        ]);
    }

    #[test]
    fn test_string_to_local_truncates() {
        let mut ctx = context();
        let addr = ctx.heap_alloc(8).unwrap();
        assert_eq!(ctx.string_to_local(addr, 4, "hello").unwrap(), 3);
        assert_eq!(ctx.local_to_string(addr, 64).unwrap(), "hel");
        assert_eq!(ctx.local_to_string(addr, 3).unwrap(), "he");
        assert!(ctx.string_to_local(addr, 0, "x").is_err());
    }

    #[test]
    fn test_string_to_local_utf8_keeps_whole_chars() {
        let mut ctx = context();
        let addr = ctx.heap_alloc(8).unwrap();

        assert_eq!(ctx.string_to_local_utf8(addr, 2, "é").unwrap(), 0);
        assert_eq!(ctx.local_to_string(addr, 64).unwrap(), "");

        assert_eq!(ctx.string_to_local_utf8(addr, 4, "aéb").unwrap(), 3);
        assert_eq!(ctx.local_to_string(addr, 64).unwrap(), "aé");

        assert_eq!(ctx.string_to_local_utf8(addr, 8, "añ\0zz").unwrap(), 3);
        assert_eq!(ctx.local_to_string(addr, 64).unwrap(), "añ");
        assert!(ctx.string_to_local_utf8(addr, 0, "x").is_err());
    }

    #[test]
    fn test_local_to_string_buf_terminates() {
        let mut ctx = context();
        let addr = ctx.heap_alloc(8).unwrap();
        ctx.string_to_local(addr, 8, "abc").unwrap();

        let mut buffer = [0xFFu8; 3];
        assert_eq!(ctx.local_to_string_buf(addr, &mut buffer).unwrap(), 2);
        assert_eq!(buffer, [b'a', b'b', 0]);
        assert!(ctx.local_to_string_buf(addr, &mut []).is_err());
    }

    #[test]
    fn test_bind_natives() {
        let mut ctx = context();
        assert_eq!(ctx.unbound_natives(), vec!["Bar", "Foo"]);

        let foo = ctx.find_native_by_name("Foo").unwrap();
        let bound = ctx.bind_natives(
            &[NativeInfo::new("Foo", native_one), NativeInfo::new("Missing", native_two)],
            false,
        );
        assert_eq!(bound, 1);
        assert_eq!(ctx.native_status(foo).unwrap(), NativeStatus::Bound);

        // Bound slots survive a second bind unless overwrite is set
        assert_eq!(ctx.bind_natives(&[NativeInfo::new("Foo", native_two)], false), 0);
        assert_eq!(ctx.invoke_native(foo, &[]).unwrap(), 1);
        assert_eq!(ctx.bind_natives(&[NativeInfo::new("Foo", native_two)], true), 1);
        assert_eq!(ctx.invoke_native(foo, &[]).unwrap(), 2);
    }

    #[test]
    fn test_bind_native_to_any() {
        let mut ctx = context();
        let foo = ctx.find_native_by_name("Foo").unwrap();
        let bar = ctx.find_native_by_name("Bar").unwrap();
        ctx.bind_native(foo, native_one, false).unwrap();
        ctx.bind_native_to_any(native_sum);

        assert_eq!(ctx.native_status(foo).unwrap(), NativeStatus::Bound);
        assert_eq!(ctx.native_status(bar).unwrap(), NativeStatus::Pending);
        assert_eq!(ctx.invoke_native(bar, &[2, 3]).unwrap(), 5);
        assert!(ctx.unbound_natives().is_empty());

        // A specific bind replaces a pending slot
        assert!(ctx.bind_native(bar, native_two, false).unwrap());
        assert_eq!(ctx.native_status(bar).unwrap(), NativeStatus::Bound);
    }

    #[test]
    fn test_invoke_unbound_native() {
        let mut ctx = context();
        let bar = ctx.find_native_by_name("Bar").unwrap();
        assert!(matches!(
            ctx.invoke_native(bar, &[]),
            Err(SmxError::InvalidNative(ref name)) if name == "Bar"
        ));
        assert!(matches!(ctx.invoke_native(9, &[]), Err(SmxError::Index { .. })));
        assert!(ctx.bind_native(9, native_one, true).is_err());
    }

    #[test]
    fn test_pubvar_addrs() {
        let mut ctx = context();
        let index = ctx.find_pubvar_by_name("g_Version").unwrap();
        let (local, offset) = ctx.get_pubvar_addrs(index).unwrap();
        assert_eq!(local, 8);
        assert_eq!(offset, 8);

        ctx.write_cell(local, 42).unwrap();
        assert_eq!(ctx.read_cell(local).unwrap(), 42);
        assert!(ctx.get_pubvar_addrs(1).is_err());
    }

    #[test]
    fn test_execute_balanced() {
        let mut ctx = context();
        let public = ctx.find_public_by_name("OnPluginStart").unwrap();
        ctx.push_cell(10).unwrap();
        ctx.push_string("arg").unwrap();
        let hp = ctx.hp();

        let mut runner = |ctx: &mut PluginContext, code_offset: u32| -> Result<Cell> {
            assert_eq!(code_offset, 0);
            let argc = ctx.read_cell(ctx.sp())?;
            let first = ctx.read_cell(ctx.sp() + 8)?;
            Ok(argc * 100 + first)
        };
        assert_eq!(ctx.execute(public, &mut runner).unwrap(), 210);
        assert_eq!(ctx.sp(), 1000);
        assert_eq!(ctx.hp(), hp);
        assert_eq!(ctx.pushcount(), 0);
    }

    #[test]
    fn test_execute_detects_leaks() {
        let mut ctx = context();

        let mut leaks_stack = |ctx: &mut PluginContext, _: u32| -> Result<Cell> {
            ctx.push_cell(1)?;
            Ok(0)
        };
        assert!(matches!(
            ctx.execute(0, &mut leaks_stack),
            Err(SmxError::StackLeak { .. })
        ));
        assert_eq!(ctx.sp(), 1000);

        let mut leaks_heap = |ctx: &mut PluginContext, _: u32| -> Result<Cell> {
            ctx.heap_alloc(4)?;
            Ok(0)
        };
        assert!(matches!(
            ctx.execute(0, &mut leaks_heap),
            Err(SmxError::HeapLeak { .. })
        ));
        assert_eq!(ctx.hp(), ctx.heapbase());
        assert!(ctx.heap_alloc(1).is_ok());
    }

    #[test]
    fn test_execute_restores_blocks_popped_by_runner() {
        let mut ctx = context();
        let arg = ctx.push_string("x").unwrap();
        assert_eq!(arg, 104);

        let mut pops_arg = |ctx: &mut PluginContext, _: u32| -> Result<Cell> {
            ctx.heap_pop(arg)?;
            // Reuse the freed space with a block of a different size
            ctx.heap_alloc(1)?;
            Ok(0)
        };
        assert!(matches!(
            ctx.execute(0, &mut pops_arg),
            Err(SmxError::HeapLeak { .. })
        ));
        assert_eq!(ctx.hp(), 112);
        assert_eq!(ctx.read_cell(100).unwrap(), 2);

        ctx.heap_pop(arg).unwrap();
        assert_eq!(ctx.hp(), ctx.heapbase());
    }

    #[test]
    fn test_execute_tracks_depth() {
        let mut ctx = context();
        assert!(!ctx.is_in_exec());

        let mut inner = |ctx: &mut PluginContext, _: u32| -> Result<Cell> {
            Ok(ctx.exec_depth() as Cell)
        };
        let mut outer = |ctx: &mut PluginContext, _: u32| -> Result<Cell> {
            assert!(ctx.is_in_exec());
            ctx.execute(0, &mut inner)
        };
        assert_eq!(ctx.execute(0, &mut outer).unwrap(), 2);
        assert_eq!(ctx.exec_depth(), 0);

        let mut fails = |_: &mut PluginContext, _: u32| -> Result<Cell> {
            Err(SmxError::Param("boom".to_string()))
        };
        assert!(ctx.execute(0, &mut fails).is_err());
        assert!(!ctx.is_in_exec());
    }

    #[test]
    fn test_execute_runner_error_restores_frame() {
        let mut ctx = context();
        ctx.push_cell(1).unwrap();
        let mut fails = |ctx: &mut PluginContext, _: u32| -> Result<Cell> {
            ctx.push_cell(99)?;
            Err(SmxError::InvalidNative("Foo".to_string()))
        };
        assert!(matches!(
            ctx.execute(0, &mut fails),
            Err(SmxError::InvalidNative(_))
        ));
        assert_eq!(ctx.sp(), 1000);
        assert!(matches!(ctx.execute(5, &mut fails), Err(SmxError::Index { .. })));
    }

    #[test]
    fn test_refusals_are_traced() {
        let ring = LogRingBuffer::new(16);
        let logger = Logger::new(Level::Trace).with_sink(ring.clone());
        let ctx = PluginContext::with_config(image(100, 1000), &ContextConfig::default(), logger)
            .unwrap();

        assert!(ctx.local_to_phys(-1).is_err());
        let records = ring.dump_records();
        assert!(records.iter().any(|r| r.message.starts_with("context created")));
        assert!(records.iter().any(|r| r.message.starts_with("refused: Invalid address")));
    }
}

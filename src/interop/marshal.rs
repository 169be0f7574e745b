//! Argument marshalling - native cells to typed values
//!
//! Wire shape: an ordered sequence of machine-word cells, one per declared
//! parameter (instance methods prepend one receiver cell).
//!
//! | Tag              | Cell content                                          |
//! |------------------|-------------------------------------------------------|
//! | bool, ints       | the value, zero-extended into the low bits            |
//! | f32 / f64        | the IEEE bit pattern in the low bits                  |
//! | string           | pointer to a pointer to NUL-terminated UTF-8          |
//! | struct           | pointer to `size` bytes of the value                  |
//! | handle           | pointer to an 8-byte [`ManagedHandle`]                |
//! | object           | object cache reference token                          |
//!
//! Decoding goes through [`ArgCursor`], which checks the remaining length
//! before every read and reports the parameter index and tag on failure.
//! Buffers built by an [`ArgPacker`] also remember what each cell holds, so
//! a plain word is never followed as a pointer.

use core::ffi::{c_char, CStr};
use std::ffi::{CString, NulError};

use super::call::CallArgs;
use super::types::{blittable_bytes, BlittableValue, Cell, StructLayout, StructValue, TypeTag, Value};
use crate::cache::{ManagedHandle, ObjectCache};
use crate::error::{BridgeError, MarshalError};
use crate::handles::{ClassHandle, ReferenceToken};
use crate::registry::MethodSignature;

/// What an [`ArgPacker`] stored in one cell
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CellKind {
    /// Plain value or reference token
    Word,
    /// Pointer to a string pointer variable
    StrSlot,
    /// Pointer to this many struct bytes
    Blob(usize),
    /// Pointer to a managed handle
    Handle,
    /// Appended with [`ArgPacker::push_raw`]; the caller vouched for it
    Raw,
}

impl CellKind {
    /// Whether a cell of this kind can be decoded as `tag`
    pub fn fits(self, tag: TypeTag) -> bool {
        match (self, tag) {
            (Self::Raw, _) => true,
            (Self::StrSlot, TypeTag::Str) => true,
            (Self::Handle, TypeTag::Handle) => true,
            (Self::Blob(len), TypeTag::Struct(layout)) => len == layout.size,
            (Self::Word, tag) => !matches!(tag, TypeTag::Str | TypeTag::Struct(_) | TypeTag::Handle),
            _ => false,
        }
    }
}

/// Borrowed argument cells of one invocation
#[derive(Clone, Copy, Debug)]
pub struct ArgBuffer<'a> {
    cells: &'a [Cell],
    // Present for packer-built buffers, parallel to `cells`
    kinds: Option<&'a [CellKind]>,
}

impl<'a> ArgBuffer<'a> {
    /// Buffer with no cells
    pub const fn empty() -> Self {
        Self { cells: &[], kinds: None }
    }

    /// Wrap cells produced by a native caller.
    ///
    /// # Safety
    /// Every pointer cell must point at memory laid out as the wire shape
    /// requires for the parameter it belongs to, valid for the lifetime `'a`.
    pub unsafe fn from_cells(cells: &'a [Cell]) -> Self {
        Self { cells, kinds: None }
    }

    /// Wrap a raw `(pointer, count)` pair received over the C ABI.
    ///
    /// # Safety
    /// Same as [`ArgBuffer::from_cells`]; in addition `cells` must point at
    /// `count` readable cells or be null with `count == 0`.
    pub unsafe fn from_raw_parts(cells: *const Cell, count: usize) -> Self {
        if cells.is_null() || count == 0 {
            return Self::empty();
        }
        Self {
            cells: core::slice::from_raw_parts(cells, count),
            kinds: None,
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.cells.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    #[inline]
    pub fn cells(&self) -> &'a [Cell] {
        self.cells
    }

    pub fn cursor(&self) -> ArgCursor<'a> {
        ArgCursor {
            cells: self.cells,
            kinds: self.kinds,
            position: 0,
        }
    }

    /// Check recorded cell kinds against the parameters of `signature`.
    ///
    /// Buffers wrapped from native cells carry no kinds and always pass.
    pub fn check_kinds(&self, signature: &MethodSignature) -> Result<(), MarshalError> {
        let Some(kinds) = self.kinds else {
            return Ok(());
        };
        let receiver_cells = signature.cell_count() - signature.params.len();
        for (index, tag) in signature.params.iter().copied().enumerate() {
            match kinds.get(receiver_cells + index) {
                Some(kind) if !kind.fits(tag) => return Err(MarshalError::TagMismatch { index, tag }),
                _ => {}
            }
        }
        Ok(())
    }
}

/// Length-checked reader over an [`ArgBuffer`]
pub struct ArgCursor<'a> {
    cells: &'a [Cell],
    kinds: Option<&'a [CellKind]>,
    position: usize,
}

impl<'a> ArgCursor<'a> {
    #[inline]
    pub fn remaining(&self) -> usize {
        self.cells.len() - self.position
    }

    #[inline]
    pub fn consumed(&self) -> usize {
        self.position
    }

    fn next_cell(&mut self) -> Option<Cell> {
        let cell = self.cells.get(self.position).copied()?;
        self.position += 1;
        Some(cell)
    }

    /// Take the next cell for parameter `index` without interpreting it.
    ///
    /// Fails with `TagMismatch` when the cell was recorded as something that
    /// cannot be read as `tag`.
    pub fn take(&mut self, index: usize, tag: TypeTag) -> Result<Cell, MarshalError> {
        let position = self.position;
        let cell = self.next_cell().ok_or(MarshalError::MissingArgument { index, tag })?;
        match self.kinds.and_then(|kinds| kinds.get(position)) {
            Some(kind) if !kind.fits(tag) => Err(MarshalError::TagMismatch { index, tag }),
            _ => Ok(cell),
        }
    }

    /// Decode the next cell as parameter `index` of type `tag`
    pub fn decode(&mut self, index: usize, tag: TypeTag) -> Result<Value, MarshalError> {
        let cell = self.take(index, tag)?;
        let value = match tag {
            TypeTag::Void => Value::Void,
            TypeTag::Bool => Value::Bool(cell != 0),
            TypeTag::I8 => Value::I8(cell as u8 as i8),
            TypeTag::I16 => Value::I16(cell as u16 as i16),
            TypeTag::I32 => Value::I32(cell as u32 as i32),
            TypeTag::I64 => Value::I64(cell as u64 as i64),
            TypeTag::U8 => Value::U8(cell as u8),
            TypeTag::U16 => Value::U16(cell as u16),
            TypeTag::U32 => Value::U32(cell as u32),
            TypeTag::U64 => Value::U64(cell as u64),
            TypeTag::F32 => Value::F32(f32::from_bits(cell as u32)),
            TypeTag::F64 => Value::F64(f64::from_bits(cell as u64)),
            TypeTag::Object => Value::Object(ReferenceToken::from_raw(cell)),
            // SAFETY: native buffers are vouched for by `from_cells`; packer
            // buffers passed the kind check in `take`
            TypeTag::Str => Value::Str(unsafe { decode_string(cell, index)? }),
            TypeTag::Struct(layout) => unsafe { decode_struct(cell, index, layout)? },
            TypeTag::Handle => Value::Handle(unsafe { decode_handle(cell, index)? }),
        };
        Ok(value)
    }

    /// Require that every cell was consumed
    pub fn finish(self) -> Result<(), MarshalError> {
        if self.remaining() == 0 {
            Ok(())
        } else {
            Err(MarshalError::CellCountMismatch {
                expected: self.position,
                found: self.cells.len(),
            })
        }
    }
}

/// Two dereferences: cell -> pointer variable -> C string
unsafe fn decode_string(cell: Cell, index: usize) -> Result<Option<String>, MarshalError> {
    let slot = cell as *const *const c_char;
    if slot.is_null() {
        return Err(MarshalError::NullPointer { index, tag: TypeTag::Str });
    }
    let text = core::ptr::read_unaligned(slot);
    if text.is_null() {
        return Ok(None);
    }
    CStr::from_ptr(text)
        .to_str()
        .map(|s| Some(s.to_owned()))
        .map_err(|_| MarshalError::InvalidUtf8 { index })
}

unsafe fn decode_struct(cell: Cell, index: usize, layout: StructLayout) -> Result<Value, MarshalError> {
    let data = cell as *const u8;
    if layout.size == 0 {
        return Ok(Value::Struct(StructValue::from_bytes(layout, &[])));
    }
    if data.is_null() {
        return Err(MarshalError::NullPointer { index, tag: TypeTag::Struct(layout) });
    }
    let bytes = core::slice::from_raw_parts(data, layout.size);
    Ok(Value::Struct(StructValue::from_bytes(layout, bytes)))
}

unsafe fn decode_handle(cell: Cell, index: usize) -> Result<ManagedHandle, MarshalError> {
    let blob = cell as *const ManagedHandle;
    if blob.is_null() {
        return Err(MarshalError::NullPointer { index, tag: TypeTag::Handle });
    }
    Ok(core::ptr::read_unaligned(blob))
}

/// Decode a full invocation per its recorded signature.
///
/// The cell count is validated before anything is dereferenced; the receiver
/// and object arguments are resolved through the cache.
pub(crate) fn unpack_call(
    signature: &MethodSignature,
    class: ClassHandle,
    args: ArgBuffer<'_>,
    cache: &ObjectCache,
) -> Result<CallArgs, BridgeError> {
    let expected = signature.cell_count();
    if args.len() > expected {
        return Err(MarshalError::CellCountMismatch { expected, found: args.len() }.into());
    }
    if args.len() < expected {
        let receiver_cells = expected - signature.params.len();
        if args.len() < receiver_cells {
            return Err(MarshalError::MissingReceiver.into());
        }
        let index = args.len() - receiver_cells;
        return Err(MarshalError::MissingArgument { index, tag: signature.params[index] }.into());
    }

    args.check_kinds(signature)?;

    let mut cursor = args.cursor();
    let receiver = if signature.kind.is_instance() {
        let token = ReferenceToken::from_raw(cursor.next_cell().ok_or(MarshalError::MissingReceiver)?);
        let resolved = cache.resolve(token)?;
        if resolved.class != class {
            return Err(MarshalError::ReceiverMismatch { expected: class, found: resolved.class }.into());
        }
        Some(resolved.object)
    } else {
        None
    };

    let mut call_args = CallArgs::new(receiver);
    for (index, tag) in signature.params.iter().copied().enumerate() {
        if tag == TypeTag::Object {
            let token = ReferenceToken::from_raw(cursor.take(index, tag)?);
            let resolved = cache.resolve(token)?;
            call_args.push_object(token, resolved.object);
        } else {
            call_args.push(cursor.decode(index, tag)?);
        }
    }
    cursor.finish()?;
    Ok(call_args)
}

/// Builds argument cells in the native wire shape.
///
/// The packer owns every pointee, so the buffer it hands out stays valid for
/// as long as the packer is borrowed. Each cell's [`CellKind`] travels with
/// the buffer. Used by in-process runtimes, tests and benchmarks to play the
/// native caller.
#[derive(Default)]
pub struct ArgPacker {
    cells: Vec<Cell>,
    kinds: Vec<CellKind>,
    strings: Vec<CString>,
    string_slots: Vec<Box<*const c_char>>,
    blobs: Vec<Box<[u8]>>,
    handles: Vec<Box<ManagedHandle>>,
}

impl ArgPacker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    /// Receiver cell for an instance method
    pub fn push_this(&mut self, token: ReferenceToken) -> &mut Self {
        self.push_cell(token.as_raw(), CellKind::Word)
    }

    pub fn push_object(&mut self, token: ReferenceToken) -> &mut Self {
        self.push_cell(token.as_raw(), CellKind::Word)
    }

    /// Append a cell verbatim.
    ///
    /// # Safety
    /// If the cell is decoded as a pointer-carrying tag, it must point at
    /// memory that outlives every buffer handed out by this packer.
    pub unsafe fn push_raw(&mut self, cell: Cell) -> &mut Self {
        self.push_cell(cell, CellKind::Raw)
    }

    fn push_cell(&mut self, cell: Cell, kind: CellKind) -> &mut Self {
        self.cells.push(cell);
        self.kinds.push(kind);
        self
    }

    fn push_word(&mut self, cell: Cell) -> &mut Self {
        self.push_cell(cell, CellKind::Word)
    }

    pub fn push_bool(&mut self, value: bool) -> &mut Self {
        self.push_word(value as Cell)
    }

    pub fn push_i32(&mut self, value: i32) -> &mut Self {
        self.push_word(value as u32 as Cell)
    }

    pub fn push_i64(&mut self, value: i64) -> &mut Self {
        self.push_word(value as u64 as Cell)
    }

    pub fn push_u32(&mut self, value: u32) -> &mut Self {
        self.push_word(value as Cell)
    }

    pub fn push_u64(&mut self, value: u64) -> &mut Self {
        self.push_word(value as Cell)
    }

    pub fn push_f32(&mut self, value: f32) -> &mut Self {
        self.push_word(value.to_bits() as Cell)
    }

    pub fn push_f64(&mut self, value: f64) -> &mut Self {
        self.push_word(value.to_bits() as Cell)
    }

    /// String cell with the double indirection
    pub fn push_str(&mut self, value: &str) -> Result<&mut Self, NulError> {
        let text = CString::new(value)?;
        let slot = Box::new(text.as_ptr());
        // CString's heap buffer does not move when the CString is moved
        self.strings.push(text);
        self.push_slot(slot);
        Ok(self)
    }

    /// String cell whose pointer variable holds null
    pub fn push_null_str(&mut self) -> &mut Self {
        self.push_slot(Box::new(core::ptr::null()))
    }

    fn push_slot(&mut self, slot: Box<*const c_char>) -> &mut Self {
        let address = &*slot as *const *const c_char as Cell;
        self.string_slots.push(slot);
        self.push_cell(address, CellKind::StrSlot)
    }

    pub fn push_struct_bytes(&mut self, bytes: &[u8]) -> &mut Self {
        let blob: Box<[u8]> = bytes.into();
        let address = if blob.is_empty() { 0 } else { blob.as_ptr() as Cell };
        let kind = CellKind::Blob(blob.len());
        self.blobs.push(blob);
        self.push_cell(address, kind)
    }

    pub fn push_struct<T: BlittableValue>(&mut self, value: &T) -> &mut Self {
        self.push_struct_bytes(blittable_bytes(value))
    }

    pub fn push_handle(&mut self, handle: ManagedHandle) -> &mut Self {
        let blob = Box::new(handle);
        let address = &*blob as *const ManagedHandle as Cell;
        self.handles.push(blob);
        self.push_cell(address, CellKind::Handle)
    }

    /// Encode any decoded value back into its cell
    pub fn push_value(&mut self, value: &Value) -> Result<&mut Self, NulError> {
        Ok(match value {
            Value::Void => self.push_word(0),
            Value::Bool(v) => self.push_bool(*v),
            Value::I8(v) => self.push_word(*v as u8 as Cell),
            Value::I16(v) => self.push_word(*v as u16 as Cell),
            Value::I32(v) => self.push_i32(*v),
            Value::I64(v) => self.push_i64(*v),
            Value::U8(v) => self.push_word(*v as Cell),
            Value::U16(v) => self.push_word(*v as Cell),
            Value::U32(v) => self.push_u32(*v),
            Value::U64(v) => self.push_u64(*v),
            Value::F32(v) => self.push_f32(*v),
            Value::F64(v) => self.push_f64(*v),
            Value::Str(Some(s)) => self.push_str(s)?,
            Value::Str(None) => self.push_null_str(),
            Value::Struct(v) => self.push_struct_bytes(&v.bytes),
            Value::Handle(h) => self.push_handle(*h),
            Value::Object(token) => self.push_object(*token),
        })
    }

    pub fn cells(&self) -> &[Cell] {
        &self.cells
    }

    pub fn kinds(&self) -> &[CellKind] {
        &self.kinds
    }

    /// Borrow the cells with their kinds; a cell whose kind does not fit
    /// the declared tag is rejected before it is dereferenced
    pub fn buffer(&self) -> ArgBuffer<'_> {
        ArgBuffer {
            cells: &self.cells,
            kinds: Some(&self.kinds),
        }
    }
}

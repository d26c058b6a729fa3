//! .pyc header and marshal object-graph reader.
//!
//! Lifts a raw byte buffer into a [`CodeObject`] tree. The header layout
//! and the code-object field order both depend on the version identified by
//! the magic word, so the reader resolves the version first and branches
//! from there.
//!
//! Reference-table discipline matters here: a container or code object
//! whose type byte carries `FLAG_REF` must reserve its table slot *before*
//! its children parse, then overwrite the slot once materialized. A child
//! that back-references a still-reserved slot is a forward reference, which
//! the format forbids.

use std::sync::Arc;

use crate::bigint::BigInt;
use crate::code::{parse_exception_table, CodeObject, Constant};
use crate::errors::{LoadError, LoadResult};
use crate::version::{magic_to_version, Version};

/// High bit of a marshal type byte: append the object to the ref table.
const FLAG_REF: u8 = 0x80;

/// A parsed .pyc file: resolved version plus the module code object.
#[derive(Debug)]
pub struct PycFile {
    pub magic: u32,
    pub version: Version,
    /// True when a 3.7+ flag word selected a hash-based pyc.
    pub hash_based: bool,
    pub code: Arc<CodeObject>,
}

/// Parses a whole .pyc buffer (header plus marshalled module code).
pub fn parse_pyc(data: &[u8]) -> LoadResult<PycFile> {
    let mut reader = Reader::new(data);
    let magic = reader.read_u32()?;
    let version = magic_to_version(magic)?;
    reader.version = version;

    // Header: mtime only, then +source size (3.3), then +flags (3.7).
    let mut hash_based = false;
    if version >= Version::new(3, 7) {
        let bit_field = reader.read_u32()?;
        hash_based = bit_field & 1 != 0;
        reader.skip(8)?; // mtime + size, or the source hash
    } else if version >= Version::new(3, 3) {
        reader.skip(8)?;
    } else {
        reader.skip(4)?;
    }

    let code = match reader.read_object()? {
        Constant::Code(code) => code,
        other => {
            log::warn!("top-level marshal object is not code ({other:?})");
            return Err(LoadError::BadMarshalType {
                type_byte: 0,
                offset: reader.pos,
            });
        }
    };
    Ok(PycFile {
        magic,
        version,
        hash_based,
        code,
    })
}

/// Parses a bare marshal stream (no .pyc header) for a known version.
pub fn parse_marshal(data: &[u8], version: Version) -> LoadResult<Constant> {
    let mut reader = Reader::new(data);
    reader.version = version;
    reader.read_object()
}

/// A slot in the module-wide reference table.
///
/// `Reserved` is the only placeholder in the whole data model: it exists
/// exactly between a container's type byte and the end of its children.
#[derive(Debug, Clone)]
enum RefSlot {
    Reserved,
    Filled(Constant),
}

struct Reader<'a> {
    data: &'a [u8],
    pos: usize,
    version: Version,
    /// FLAG_REF table; indices are assigned in reservation/append order.
    refs: Vec<RefSlot>,
    /// Python-2 intern table fed by 't' strings, consumed by 'R'.
    interns: Vec<Vec<u8>>,
}

impl<'a> Reader<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self {
            data,
            pos: 0,
            version: Version::new(3, 14),
            refs: Vec::new(),
            interns: Vec::new(),
        }
    }

    fn eof(&self) -> LoadError {
        LoadError::UnexpectedEof { offset: self.pos }
    }

    fn take(&mut self, n: usize) -> LoadResult<&'a [u8]> {
        let end = self.pos.checked_add(n).ok_or_else(|| self.eof())?;
        let bytes = self.data.get(self.pos..end).ok_or_else(|| self.eof())?;
        self.pos = end;
        Ok(bytes)
    }

    fn skip(&mut self, n: usize) -> LoadResult<()> {
        self.take(n).map(|_| ())
    }

    fn read_u8(&mut self) -> LoadResult<u8> {
        Ok(self.take(1)?[0])
    }

    fn read_u16(&mut self) -> LoadResult<u16> {
        let b = self.take(2)?;
        Ok(u16::from_le_bytes([b[0], b[1]]))
    }

    fn read_u32(&mut self) -> LoadResult<u32> {
        let b = self.take(4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn read_i32(&mut self) -> LoadResult<i32> {
        self.read_u32().map(|v| v as i32)
    }

    fn read_i64(&mut self) -> LoadResult<i64> {
        let b = self.take(8)?;
        Ok(i64::from_le_bytes(b.try_into().expect("8-byte slice")))
    }

    fn read_f64(&mut self) -> LoadResult<f64> {
        let b = self.take(8)?;
        Ok(f64::from_le_bytes(b.try_into().expect("8-byte slice")))
    }

    /// Short (u8-length-prefixed) ASCII float, as written by 'f'/'x'.
    fn read_text_float(&mut self) -> LoadResult<f64> {
        let len = self.read_u8()? as usize;
        let text = self.take(len)?;
        std::str::from_utf8(text)
            .ok()
            .and_then(|s| s.parse().ok())
            .ok_or(LoadError::BadMarshalType {
                type_byte: b'f',
                offset: self.pos,
            })
    }

    fn read_bytes_u32(&mut self) -> LoadResult<Vec<u8>> {
        let len = self.read_u32()? as usize;
        Ok(self.take(len)?.to_vec())
    }

    /// Reads one object from the stream.
    fn read_object(&mut self) -> LoadResult<Constant> {
        let offset = self.pos;
        let type_byte = self.read_u8()?;
        let flag_ref = type_byte & FLAG_REF != 0;
        let code = type_byte & !FLAG_REF;

        // Containers and code objects reserve their slot before children so
        // sibling indices stay stable; scalars append after parsing.
        let reserved = if flag_ref && matches!(code, b'(' | b')' | b'[' | b'{' | b'<' | b'>' | b'c') {
            self.refs.push(RefSlot::Reserved);
            Some(self.refs.len() - 1)
        } else {
            None
        };

        let object = self.read_typed(code, offset)?;

        if let Some(slot) = reserved {
            self.refs[slot] = RefSlot::Filled(object.clone());
        } else if flag_ref {
            self.refs.push(RefSlot::Filled(object.clone()));
        }
        Ok(object)
    }

    #[allow(clippy::too_many_lines)]
    fn read_typed(&mut self, code: u8, offset: usize) -> LoadResult<Constant> {
        match code {
            b'N' => Ok(Constant::None),
            b'T' => Ok(Constant::Bool(true)),
            b'F' => Ok(Constant::Bool(false)),
            b'.' => Ok(Constant::Ellipsis),
            b'S' => Ok(Constant::StopIteration),
            b'i' => Ok(Constant::Int(i64::from(self.read_i32()?))),
            b'I' => Ok(Constant::Int(self.read_i64()?)),
            b'l' => self.read_long(),
            b'f' => Ok(Constant::Float(self.read_text_float()?)),
            b'g' => Ok(Constant::Float(self.read_f64()?)),
            b'x' => {
                let real = self.read_text_float()?;
                let imag = self.read_text_float()?;
                Ok(Constant::Complex { real, imag })
            }
            b'y' => {
                let real = self.read_f64()?;
                let imag = self.read_f64()?;
                Ok(Constant::Complex { real, imag })
            }
            b's' => {
                let bytes = self.read_bytes_u32()?;
                // Python 2's plain str is source text; 3.x 's' is bytes.
                if self.version.major >= 3 {
                    Ok(Constant::Bytes(bytes))
                } else {
                    Ok(Constant::Str(bytes))
                }
            }
            b'a' | b'A' => Ok(Constant::Str(self.read_bytes_u32()?)),
            b't' => {
                let bytes = self.read_bytes_u32()?;
                if self.version.major < 3 {
                    self.interns.push(bytes.clone());
                }
                Ok(Constant::Str(bytes))
            }
            b'z' | b'Z' => {
                let len = self.read_u8()? as usize;
                Ok(Constant::Str(self.take(len)?.to_vec()))
            }
            b'u' => Ok(Constant::Str(self.read_bytes_u32()?)),
            b'(' => {
                let count = self.read_u32()? as usize;
                self.read_seq(count).map(Constant::Tuple)
            }
            b')' => {
                let count = self.read_u8()? as usize;
                self.read_seq(count).map(Constant::Tuple)
            }
            b'[' => {
                let count = self.read_u32()? as usize;
                self.read_seq(count).map(Constant::List)
            }
            b'{' => self.read_dict(),
            b'<' => {
                let count = self.read_u32()? as usize;
                self.read_seq(count).map(Constant::Set)
            }
            b'>' => {
                let count = self.read_u32()? as usize;
                self.read_seq(count).map(Constant::FrozenSet)
            }
            b':' => {
                // 3.14 slice objects: start, stop, step.
                let start = self.read_object()?;
                let stop = self.read_object()?;
                let step = self.read_object()?;
                Ok(Constant::Tuple(vec![start, stop, step]))
            }
            b'c' => self.read_code(),
            b'r' => {
                let index = self.read_u32()?;
                match self.refs.get(index as usize) {
                    Some(RefSlot::Filled(object)) => Ok(object.clone()),
                    // A reserved slot means the stream points forward into
                    // an object still being parsed; its content is undefined.
                    Some(RefSlot::Reserved) | None => Err(LoadError::InvalidRef { index }),
                }
            }
            b'R' => {
                let index = self.read_u32()?;
                match self.interns.get(index as usize) {
                    Some(bytes) => Ok(Constant::Str(bytes.clone())),
                    None => Err(LoadError::InvalidStringRef { index }),
                }
            }
            _ => Err(LoadError::BadMarshalType {
                type_byte: code,
                offset,
            }),
        }
    }

    fn read_seq(&mut self, count: usize) -> LoadResult<Vec<Constant>> {
        // An element cannot be smaller than one type byte, so a count
        // beyond the remaining bytes is already truncation.
        if count > self.data.len() - self.pos {
            return Err(self.eof());
        }
        let mut items = Vec::with_capacity(count);
        for _ in 0..count {
            items.push(self.read_object()?);
        }
        Ok(items)
    }

    /// Dict: key/value pairs until a NULL ('0') key terminator.
    fn read_dict(&mut self) -> LoadResult<Constant> {
        let mut pairs = Vec::new();
        loop {
            if self.data.get(self.pos) == Some(&b'0') {
                self.pos += 1;
                return Ok(Constant::Dict(pairs));
            }
            let key = self.read_object()?;
            let value = self.read_object()?;
            pairs.push((key, value));
        }
    }

    /// Arbitrary-precision long: signed digit count, then little-endian
    /// 15-bit digits. Collapses to `Int` when the value fits i64.
    fn read_long(&mut self) -> LoadResult<Constant> {
        let count = self.read_i32()?;
        let negative = count < 0;
        let count = count.unsigned_abs() as usize;
        let mut digits = Vec::with_capacity(count);
        for _ in 0..count {
            digits.push(self.read_u16()?);
        }
        let value = BigInt::new(digits, negative);
        Ok(match value.to_i64() {
            Some(small) => Constant::Int(small),
            None => Constant::Long(value),
        })
    }

    /// Reads a string-valued field (filename, name, ...) leniently.
    fn read_name_string(&mut self) -> LoadResult<String> {
        match self.read_object()? {
            Constant::Str(bytes) | Constant::Bytes(bytes) => Ok(String::from_utf8_lossy(&bytes).into_owned()),
            _ => Ok(String::new()),
        }
    }

    /// Reads a tuple of strings (names, varnames, ...) leniently.
    fn read_name_tuple(&mut self) -> LoadResult<Vec<String>> {
        match self.read_object()? {
            Constant::Tuple(items) | Constant::List(items) => Ok(items
                .into_iter()
                .map(|item| match item {
                    Constant::Str(bytes) | Constant::Bytes(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
                    other => {
                        log::debug!("non-string entry in name tuple: {other:?}");
                        String::new()
                    }
                })
                .collect()),
            _ => Ok(Vec::new()),
        }
    }

    fn read_raw_bytes_object(&mut self) -> LoadResult<Vec<u8>> {
        match self.read_object()? {
            Constant::Bytes(bytes) | Constant::Str(bytes) => Ok(bytes),
            _ => Ok(Vec::new()),
        }
    }

    /// Code object bodies; field order varies by version.
    #[allow(clippy::too_many_lines)]
    fn read_code(&mut self) -> LoadResult<Constant> {
        let v = self.version;
        let mut code = CodeObject {
            version: v,
            argcount: 0,
            posonlyargcount: 0,
            kwonlyargcount: 0,
            nlocals: 0,
            stacksize: 0,
            flags: 0,
            code: Vec::new(),
            consts: Vec::new(),
            names: Vec::new(),
            varnames: Vec::new(),
            freevars: Vec::new(),
            cellvars: Vec::new(),
            filename: String::new(),
            name: String::new(),
            qualname: None,
            firstlineno: 0,
            linetable: Vec::new(),
            exception_table: Vec::new(),
        };

        if v < Version::new(1, 3) {
            // The oldest layout: no counts at all.
            code.code = self.read_raw_bytes_object()?;
            code.consts = self.read_const_tuple()?;
            code.names = self.read_name_tuple()?;
            code.filename = self.read_name_string()?;
            code.name = self.read_name_string()?;
            return Ok(Constant::Code(Arc::new(code)));
        }

        let wide = v >= Version::new(2, 3);
        let mut read_count = |r: &mut Self| -> LoadResult<u32> {
            if wide {
                r.read_u32()
            } else {
                r.read_u16().map(u32::from)
            }
        };

        code.argcount = read_count(self)?;
        if v >= Version::new(3, 8) {
            code.posonlyargcount = self.read_u32()?;
        }
        if v.major >= 3 {
            code.kwonlyargcount = self.read_u32()?;
        }
        if v < Version::new(3, 11) {
            code.nlocals = read_count(self)?;
        }
        if v >= Version::new(1, 5) {
            code.stacksize = read_count(self)?;
        }
        code.flags = read_count(self)?;

        code.code = self.read_raw_bytes_object()?;
        code.consts = self.read_const_tuple()?;
        code.names = self.read_name_tuple()?;

        if v >= Version::new(3, 11) {
            code.varnames = self.read_name_tuple()?;
            // The kinds blob encodes cell/free classification we don't need.
            let _kinds = self.read_raw_bytes_object()?;
            code.nlocals = code.varnames.len() as u32;
        } else {
            code.varnames = self.read_name_tuple()?;
            if v >= Version::new(2, 1) {
                code.freevars = self.read_name_tuple()?;
                code.cellvars = self.read_name_tuple()?;
            }
        }

        code.filename = self.read_name_string()?;
        code.name = self.read_name_string()?;
        if v >= Version::new(3, 11) {
            code.qualname = Some(self.read_name_string()?);
        }

        if v >= Version::new(2, 3) {
            code.firstlineno = self.read_u32()?;
            code.linetable = self.read_raw_bytes_object()?;
        } else if v >= Version::new(1, 5) {
            // 16-bit line number, and no line table this far back.
            code.firstlineno = u32::from(self.read_u16()?);
        }

        if v >= Version::new(3, 11) {
            let table = self.read_raw_bytes_object()?;
            code.exception_table = parse_exception_table(&table);
        }

        Ok(Constant::Code(Arc::new(code)))
    }

    fn read_const_tuple(&mut self) -> LoadResult<Vec<Constant>> {
        match self.read_object()? {
            Constant::Tuple(items) | Constant::List(items) => Ok(items),
            other => Ok(vec![other]),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_one(version: Version, bytes: &[u8]) -> LoadResult<Constant> {
        parse_marshal(bytes, version)
    }

    const V3: Version = Version::new(3, 12);
    const V2: Version = Version::new(2, 7);

    #[test]
    fn primitives() {
        assert_eq!(parse_one(V3, b"N").unwrap(), Constant::None);
        assert_eq!(parse_one(V3, b"T").unwrap(), Constant::Bool(true));
        assert_eq!(parse_one(V3, b"F").unwrap(), Constant::Bool(false));
        assert_eq!(parse_one(V3, b".").unwrap(), Constant::Ellipsis);
        assert_eq!(parse_one(V3, b"i\x2a\x00\x00\x00").unwrap(), Constant::Int(42));
        assert_eq!(parse_one(V3, b"i\xff\xff\xff\xff").unwrap(), Constant::Int(-1));
    }

    #[test]
    fn binary_float_and_complex() {
        let mut data = vec![b'g'];
        data.extend_from_slice(&1.5f64.to_le_bytes());
        assert_eq!(parse_one(V3, &data).unwrap(), Constant::Float(1.5));

        let mut data = vec![b'y'];
        data.extend_from_slice(&0.0f64.to_le_bytes());
        data.extend_from_slice(&2.0f64.to_le_bytes());
        assert_eq!(parse_one(V3, &data).unwrap(), Constant::Complex { real: 0.0, imag: 2.0 });
    }

    #[test]
    fn text_float() {
        assert_eq!(parse_one(V2, b"f\x04-2.5").unwrap(), Constant::Float(-2.5));
    }

    #[test]
    fn strings_by_era() {
        // 's' is str on Python 2, bytes on Python 3.
        let data = b"s\x02\x00\x00\x00hi";
        assert_eq!(parse_one(V2, data).unwrap(), Constant::Str(b"hi".to_vec()));
        assert_eq!(parse_one(V3, data).unwrap(), Constant::Bytes(b"hi".to_vec()));
        // Short ASCII.
        assert_eq!(parse_one(V3, b"z\x02ok").unwrap(), Constant::Str(b"ok".to_vec()));
    }

    #[test]
    fn long_collapses_to_int() {
        // 42 as one 15-bit digit.
        let data = b"l\x01\x00\x00\x00\x2a\x00";
        assert_eq!(parse_one(V2, data).unwrap(), Constant::Int(42));
        // Negative digit count flips the sign.
        let data = b"l\xff\xff\xff\xff\x2a\x00";
        assert_eq!(parse_one(V2, data).unwrap(), Constant::Int(-42));
    }

    #[test]
    fn long_wide_magnitude_stays_big() {
        // Five all-ones digits: 2^75 - 1.
        let mut data = b"l\x05\x00\x00\x00".to_vec();
        for _ in 0..5 {
            data.extend_from_slice(&0x7FFFu16.to_le_bytes());
        }
        match parse_one(V2, &data).unwrap() {
            Constant::Long(big) => assert_eq!(big.to_i64(), None),
            other => panic!("expected Long, got {other:?}"),
        }
    }

    #[test]
    fn small_tuple_and_dict() {
        let data = b")\x02NT";
        assert_eq!(
            parse_one(V3, data).unwrap(),
            Constant::Tuple(vec![Constant::None, Constant::Bool(true)])
        );

        let data = b"{z\x01aT0";
        assert_eq!(
            parse_one(V3, data).unwrap(),
            Constant::Dict(vec![(Constant::Str(b"a".to_vec()), Constant::Bool(true))])
        );
    }

    #[test]
    fn back_references_resolve() {
        // A ref-flagged string, then a tuple referencing it by index 0.
        // 0xDA = 'Z' | FLAG_REF.
        let data = b")\x02\xda\x02okr\x00\x00\x00\x00";
        assert_eq!(
            parse_one(V3, data).unwrap(),
            Constant::Tuple(vec![
                Constant::Str(b"ok".to_vec()),
                Constant::Str(b"ok".to_vec())
            ])
        );
    }

    #[test]
    fn forward_reference_is_rejected() {
        // A ref-flagged tuple whose single child points at the tuple's own
        // slot, which is still reserved. 0xA9 = ')' | FLAG_REF.
        let data = b"\xa9\x01r\x00\x00\x00\x00";
        assert_eq!(parse_one(V3, data), Err(LoadError::InvalidRef { index: 0 }));
    }

    #[test]
    fn out_of_range_reference_is_rejected() {
        let data = b"r\x07\x00\x00\x00";
        assert_eq!(parse_one(V3, data), Err(LoadError::InvalidRef { index: 7 }));
    }

    #[test]
    fn python2_string_refs() {
        // Intern "ab" via 't', then reference it with 'R' 0.
        let data = b")\x02t\x02\x00\x00\x00abR\x00\x00\x00\x00";
        assert_eq!(
            parse_one(V2, data).unwrap(),
            Constant::Tuple(vec![
                Constant::Str(b"ab".to_vec()),
                Constant::Str(b"ab".to_vec())
            ])
        );
        // An unknown intern index is fatal.
        assert_eq!(
            parse_one(V2, b"R\x05\x00\x00\x00"),
            Err(LoadError::InvalidStringRef { index: 5 })
        );
    }

    #[test]
    fn truncation_is_eof() {
        assert!(matches!(
            parse_one(V3, b"i\x2a\x00"),
            Err(LoadError::UnexpectedEof { .. })
        ));
        assert!(matches!(parse_one(V3, b"(\x02\x00\x00\x00N"), Err(LoadError::UnexpectedEof { .. })));
    }

    #[test]
    fn unknown_type_byte() {
        assert!(matches!(
            parse_one(V3, b"Q"),
            Err(LoadError::BadMarshalType { type_byte: b'Q', .. })
        ));
    }
}

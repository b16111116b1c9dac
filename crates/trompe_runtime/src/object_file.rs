//! Object files: compiled units stored in `MessagePack`.
//!
//! An object file holds every code of a unit in a flat list (the entry code
//! first, nested codes after their parents) and the attributes of the unit's
//! module. Code constants refer to other codes by index, so a file loads
//! without recompiling.

use std::collections::HashMap;
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;
use std::rc::Rc;

use serde::{Deserialize, Serialize};
use tracing::debug;
use trompe_foundation::{
    BlockClosure, CompiledCode, Error, ErrorKind, NamePath, Result, Value,
};
use trompe_language::{Module, ModuleRef, ModuleRegistry};

fn serialization_error(message: impl Into<String>) -> Error {
    Error::new(ErrorKind::SerializationError(message.into()))
}

// =============================================================================
// Records
// =============================================================================

/// A constant-pool entry.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum ConstRecord {
    /// `()`
    Unit,
    /// A boolean.
    Bool(bool),
    /// An integer.
    Int(i64),
    /// A float.
    Float(f64),
    /// A character.
    Char(char),
    /// A string, also used for attribute and primitive names.
    String(String),
    /// A module field path.
    Path(NamePath),
    /// A nested code, by index.
    Code(u32),
    /// A closure without captures over a nested code, by index.
    Closure(u32),
}

/// One compiled function.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CodeRecord {
    /// Source file.
    pub file: String,
    /// Function name.
    pub name: String,
    /// `(pc, line)` table.
    pub lines: Vec<(u32, u32)>,
    /// Encoded instructions.
    pub bytes: Vec<u8>,
    /// Declared arity.
    pub num_args: usize,
    /// Copied values.
    pub num_copied: usize,
    /// Context arrays.
    pub num_context: usize,
    /// Temporaries.
    pub num_temps: usize,
    /// Frame size.
    pub frame_size: usize,
    /// Constant pool.
    pub consts: Vec<ConstRecord>,
}

/// A module attribute value.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum AttributeValue {
    /// `()`
    Unit,
    /// A boolean.
    Bool(bool),
    /// An integer.
    Int(i64),
    /// A string.
    String(String),
    /// A function without captures, by code index.
    Code(u32),
}

/// A compiled unit and its module's attributes.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ObjectFile {
    /// Path of the unit's module.
    pub module: Vec<String>,
    /// Every code of the unit; index 0 is the entry.
    pub codes: Vec<CodeRecord>,
    /// Attributes, sorted by name.
    pub attributes: Vec<(String, AttributeValue)>,
}

// =============================================================================
// Writing
// =============================================================================

#[derive(Default)]
struct Flattener {
    codes: Vec<Option<CodeRecord>>,
    seen: HashMap<*const CompiledCode, u32>,
}

impl Flattener {
    fn code(&mut self, code: &Rc<CompiledCode>) -> Result<u32> {
        if let Some(index) = self.seen.get(&Rc::as_ptr(code)) {
            return Ok(*index);
        }
        let index = u32::try_from(self.codes.len())
            .map_err(|_| serialization_error("too many codes"))?;
        self.seen.insert(Rc::as_ptr(code), index);
        self.codes.push(None);

        let consts = code
            .consts
            .iter()
            .map(|value| self.constant(value))
            .collect::<Result<Vec<_>>>()?;
        self.codes[index as usize] = Some(CodeRecord {
            file: code.file.clone(),
            name: code.name.clone(),
            lines: code.lines.clone(),
            bytes: code.bytes.clone(),
            num_args: code.num_args,
            num_copied: code.num_copied,
            num_context: code.num_context,
            num_temps: code.num_temps,
            frame_size: code.frame_size,
            consts,
        });
        Ok(index)
    }

    fn constant(&mut self, value: &Value) -> Result<ConstRecord> {
        Ok(match value {
            Value::Unit => ConstRecord::Unit,
            Value::Bool(b) => ConstRecord::Bool(*b),
            Value::Int(n) => ConstRecord::Int(*n),
            Value::Float(x) => ConstRecord::Float(*x),
            Value::Char(c) => ConstRecord::Char(*c),
            Value::String(s) => ConstRecord::String(s.to_string()),
            Value::Path(path) => ConstRecord::Path(path.clone()),
            Value::Code(code) => ConstRecord::Code(self.code(code)?),
            Value::Closure(closure) => ConstRecord::Closure(self.clean_closure(closure)?),
            other => {
                return Err(serialization_error(format!(
                    "constant {other} cannot be stored"
                )));
            }
        })
    }

    fn clean_closure(&mut self, closure: &BlockClosure) -> Result<u32> {
        if !closure.copied.is_empty() || closure.context.is_some() {
            return Err(serialization_error(format!(
                "closure over {} has captured state",
                closure.code.name
            )));
        }
        self.code(&closure.code)
    }

    fn attribute(&mut self, name: &str, value: &Value) -> Result<AttributeValue> {
        Ok(match value {
            Value::Unit => AttributeValue::Unit,
            Value::Bool(b) => AttributeValue::Bool(*b),
            Value::Int(n) => AttributeValue::Int(*n),
            Value::String(s) => AttributeValue::String(s.to_string()),
            Value::Closure(closure) => AttributeValue::Code(self.clean_closure(closure)?),
            other => {
                return Err(serialization_error(format!(
                    "attribute {name} holds {other}, which cannot be stored"
                )));
            }
        })
    }
}

impl ObjectFile {
    /// Captures a compiled unit and the current attributes of its module.
    ///
    /// # Errors
    ///
    /// Returns `SerializationError` for attributes outside unit, bool, int,
    /// string and functions without captures.
    pub fn from_unit(code: &Rc<CompiledCode>, module: &Module) -> Result<Self> {
        let mut flattener = Flattener::default();
        flattener.code(code)?;

        let mut names = module.field_names();
        names.sort();
        let mut attributes = Vec::with_capacity(names.len());
        for name in names {
            if let Some(value) = module.find_field_value(&name) {
                let value = flattener.attribute(&name, &value)?;
                attributes.push((name, value));
            }
        }

        let codes = flattener
            .codes
            .into_iter()
            .collect::<Option<Vec<_>>>()
            .ok_or_else(|| Error::internal("unfinished code record"))?;
        debug!(
            module = %module.name(),
            codes = codes.len(),
            attributes = attributes.len(),
            "built object file"
        );
        Ok(Self {
            module: module.path().to_vec(),
            codes,
            attributes,
        })
    }

    /// Serializes to `MessagePack` bytes.
    ///
    /// # Errors
    ///
    /// Returns `SerializationError` if encoding fails.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        rmp_serde::to_vec_named(self).map_err(|e| serialization_error(e.to_string()))
    }

    /// Deserializes from `MessagePack` bytes.
    ///
    /// # Errors
    ///
    /// Returns `SerializationError` if decoding fails.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        rmp_serde::from_slice(bytes).map_err(|e| serialization_error(e.to_string()))
    }

    /// Writes the object file to `path`, replacing any existing file.
    ///
    /// # Errors
    ///
    /// Returns `IoError` if the file cannot be written.
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        let io_error = |what: &str, e: std::io::Error| {
            Error::new(ErrorKind::IoError(format!(
                "failed to {what} '{}': {e}",
                path.display()
            )))
        };
        let file = File::create(path).map_err(|e| io_error("create file", e))?;
        let mut writer = BufWriter::new(file);
        writer
            .write_all(&self.to_bytes()?)
            .map_err(|e| io_error("write to file", e))?;
        writer.flush().map_err(|e| io_error("flush file", e))?;
        Ok(())
    }

    /// Reads an object file from `path`.
    ///
    /// # Errors
    ///
    /// Returns `IoError` if the file cannot be read, or `SerializationError`
    /// if its contents do not decode.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|e| {
            Error::new(ErrorKind::IoError(format!(
                "failed to open file '{}': {e}",
                path.display()
            )))
        })?;
        let mut bytes = Vec::new();
        BufReader::new(file).read_to_end(&mut bytes).map_err(|e| {
            Error::new(ErrorKind::IoError(format!(
                "failed to read file '{}': {e}",
                path.display()
            )))
        })?;
        Self::from_bytes(&bytes)
    }

    // =========================================================================
    // Loading
    // =========================================================================

    /// Rebuilds the unit: defines its module in `registry`, restores the
    /// attributes, and returns the entry code with the module.
    ///
    /// # Errors
    ///
    /// Returns `SerializationError` for a file with no codes or a code
    /// reference that does not point to a later code.
    pub fn load(&self, registry: &ModuleRegistry) -> Result<(Rc<CompiledCode>, ModuleRef)> {
        let mut loader = Loader {
            records: &self.codes,
            built: vec![None; self.codes.len()],
        };
        if self.codes.is_empty() {
            return Err(serialization_error("object file has no codes"));
        }
        let entry = loader.code(0)?;

        let path: Vec<&str> = self.module.iter().map(String::as_str).collect();
        let module = registry.define_module(&path);
        for (name, value) in &self.attributes {
            let value = match value {
                AttributeValue::Unit => Value::Unit,
                AttributeValue::Bool(b) => Value::Bool(*b),
                AttributeValue::Int(n) => Value::Int(*n),
                AttributeValue::String(s) => Value::from(s.as_str()),
                AttributeValue::Code(index) => {
                    Value::Closure(Rc::new(BlockClosure::clean(loader.code(*index)?)))
                }
            };
            module.set_field_value(name, value);
        }
        debug!(module = %module.name(), codes = self.codes.len(), "loaded object file");
        Ok((entry, module))
    }
}

struct Loader<'a> {
    records: &'a [CodeRecord],
    built: Vec<Option<Rc<CompiledCode>>>,
}

impl Loader<'_> {
    fn code(&mut self, index: u32) -> Result<Rc<CompiledCode>> {
        let at = index as usize;
        if let Some(Some(code)) = self.built.get(at) {
            return Ok(Rc::clone(code));
        }
        let record = self
            .records
            .get(at)
            .ok_or_else(|| serialization_error(format!("code #{index} missing")))?;
        let mut consts = Vec::with_capacity(record.consts.len());
        for constant in &record.consts {
            consts.push(match constant {
                ConstRecord::Unit => Value::Unit,
                ConstRecord::Bool(b) => Value::Bool(*b),
                ConstRecord::Int(n) => Value::Int(*n),
                ConstRecord::Float(x) => Value::Float(*x),
                ConstRecord::Char(c) => Value::Char(*c),
                ConstRecord::String(s) => Value::from(s.as_str()),
                ConstRecord::Path(path) => Value::Path(path.clone()),
                ConstRecord::Code(nested) => Value::Code(self.nested(index, *nested)?),
                ConstRecord::Closure(nested) => {
                    Value::Closure(Rc::new(BlockClosure::clean(self.nested(index, *nested)?)))
                }
            });
        }
        let code = Rc::new(CompiledCode {
            file: record.file.clone(),
            name: record.name.clone(),
            lines: record.lines.clone(),
            bytes: record.bytes.clone(),
            num_args: record.num_args,
            num_copied: record.num_copied,
            num_context: record.num_context,
            num_temps: record.num_temps,
            frame_size: record.frame_size,
            consts,
        });
        self.built[at] = Some(Rc::clone(&code));
        Ok(code)
    }

    /// Codes only refer forward, which rules out cycles.
    fn nested(&mut self, parent: u32, index: u32) -> Result<Rc<CompiledCode>> {
        if index <= parent {
            return Err(serialization_error(format!(
                "code #{parent} refers back to code #{index}"
            )));
        }
        self.code(index)
    }
}

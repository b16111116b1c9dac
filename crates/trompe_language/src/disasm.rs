//! Disassembler for compiled code.
//!
//! Renders one line per instruction, with its pc, source line and any
//! constant it refers to, followed by the code's nested functions.
//!
//! ```text
//! code f (args 1, copied 0, context 0, temps 0, frame 1)
//!      0  L1  push local 0
//!      1      add1
//!      2      return
//! ```

use std::fmt::Write;

use trompe_foundation::{CompiledCode, Value};

use crate::opcode::Opcode;

/// Disassembles a code and everything in its constant pool.
#[must_use]
pub fn disassemble(code: &CompiledCode) -> String {
    let mut printer = Disassembler {
        output: String::new(),
    };
    printer.code(code, 0);
    printer.output
}

struct Disassembler {
    output: String,
}

impl Disassembler {
    fn code(&mut self, code: &CompiledCode, indent: usize) {
        let pad = " ".repeat(indent);
        let _ = writeln!(
            self.output,
            "{pad}code {} (args {}, copied {}, context {}, temps {}, frame {})",
            code.name,
            code.num_args,
            code.num_copied,
            code.num_context,
            code.num_temps,
            code.frame_size
        );

        let mut pc = 0;
        let mut last_line = None;
        while pc < code.bytes.len() {
            let (op, size) = match Opcode::decode(&code.bytes, pc) {
                Ok(decoded) => decoded,
                Err(err) => {
                    let _ = writeln!(self.output, "{pad}  {pc:>4}  <{err}>");
                    return;
                }
            };
            let line = code.line_at(pc);
            let marker = match line {
                Some(l) if line != last_line => format!("L{l}"),
                _ => String::new(),
            };
            last_line = line;
            let _ = write!(self.output, "{pad}  {pc:>4}  {marker:<4}{op}");
            if let Some(note) = operand_note(code, op) {
                let _ = write!(self.output, "  ; {note}");
            }
            self.output.push('\n');
            pc += size;
        }

        for value in &code.consts {
            match value {
                Value::Code(nested) => self.code(nested, indent + 2),
                Value::Closure(closure) => self.code(&closure.code, indent + 2),
                _ => {}
            }
        }
    }
}

/// The constant an instruction refers to, rendered for a comment.
fn operand_note(code: &CompiledCode, op: Opcode) -> Option<String> {
    let index = match op {
        Opcode::LoadConst(i)
        | Opcode::LoadGlobal(i)
        | Opcode::LoadValue(i)
        | Opcode::StorePopGlobal(i) => usize::from(i),
        Opcode::FullBlock(i)
        | Opcode::CopyingBlock { index: i, .. }
        | Opcode::FullCopyingBlock { index: i, .. }
        | Opcode::Primitive { index: i, .. } => usize::from(i),
        _ => return None,
    };
    Some(match code.consts.get(index) {
        Some(Value::String(s)) => s.to_string(),
        Some(value) => value.to_string(),
        None => format!("<missing #{index}>"),
    })
}

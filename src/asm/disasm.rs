//! Disassembler for loaded programs.
//!
//! Converts memory words back to readable mnemonics.

use crate::asm::program::Program;
use crate::cpu::decode::{decode, Opcode};
use crate::cpu::memory::Memory;

/// Disassemble the instruction at `addr`.
///
/// Returns the text and the number of words it occupies. Words that do not
/// decode are shown as raw data and occupy one word.
pub fn disassemble_at(memory: &Memory, addr: i32) -> (String, i32) {
    let Ok(word) = memory.get(addr) else {
        return ("???".to_string(), 1);
    };

    match decode(word) {
        Ok(opcode) if opcode.has_operand() => match memory.get(addr + 1) {
            Ok(operand) => (format_instruction(opcode, Some(operand)), 2),
            Err(_) => (format!("{} ???", opcode), 1),
        },
        Ok(opcode) => (format_instruction(opcode, None), 1),
        Err(_) => (format!(".word {}", word), 1),
    }
}

/// Disassemble every segment of a program.
pub fn disassemble(program: &Program) -> String {
    let mut output = String::new();
    output.push_str("; Disassembly\n");
    output.push_str("; -----------\n");

    for segment in &program.segments {
        output.push_str(&format!("\n.{}\n", segment.start));

        let mut addr = segment.start;
        while addr < segment.end {
            let (text, words) = disassemble_at(&program.memory, addr);
            let raw: Vec<String> = (addr..addr + words)
                .filter_map(|a| program.memory.get(a).ok())
                .map(|w| w.to_string())
                .collect();
            output.push_str(&format!("{:04}: {:<24} ; {}\n", addr, text, raw.join(" ")));
            addr += words;
        }
    }

    output
}

/// Format a decoded instruction as assembly text.
fn format_instruction(opcode: Opcode, operand: Option<i32>) -> String {
    match (opcode, operand) {
        (Opcode::PutPort, Some(1)) => "PutPort 1 (int)".to_string(),
        (Opcode::PutPort, Some(2)) => "PutPort 2 (char)".to_string(),
        (_, Some(operand)) => format!("{} {}", opcode, operand),
        (_, None) => opcode.to_string(),
    }
}

//! Debugger application state and logic.

use crate::asm::disasm::disassemble_at;
use crate::asm::program::Program;
use crate::config::Config;
use crate::cpu::decode::{KERNEL_BOUNDARY, MEMORY_SIZE};
use crate::cpu::{Cpu, Memory};
use std::collections::HashSet;

/// Memory rows moved by PageUp/PageDown.
const PAGE: usize = 20;

/// Debugger application state.
pub struct DebuggerApp {
    /// The CPU being debugged, with output captured in memory.
    pub cpu: Cpu<Memory, Vec<u8>>,
    /// Original program for reference.
    pub program: Program,
    pub config: Config,
    /// Breakpoints (by address).
    pub breakpoints: HashSet<i32>,
    /// Is the debugger running continuously?
    pub running: bool,
    /// Should we quit?
    pub should_quit: bool,
    /// Status message to display.
    pub status: String,
    /// Memory view scroll offset.
    pub mem_scroll: usize,
}

impl DebuggerApp {
    /// Create a new debugger with a loaded program.
    pub fn new(program: Program, config: Config) -> Self {
        let cpu = Cpu::new(program.memory.clone(), Vec::new(), &config);

        Self {
            cpu,
            program,
            config,
            breakpoints: HashSet::new(),
            running: false,
            should_quit: false,
            status: "Ready. Press 's' to step, 'r' to run, 'q' to quit.".into(),
            mem_scroll: 0,
        }
    }

    /// Step one instruction.
    pub fn step(&mut self) {
        if !self.cpu.is_running() {
            self.status = format!("CPU stopped: {:?}", self.cpu.state);
            self.running = false;
            return;
        }

        let pc = self.cpu.regs.pc;
        match self.cpu.step() {
            Ok(executed) => {
                let (text, _) = disassemble_at(self.cpu.port(), pc);
                self.status = match executed.interrupt {
                    Some(cause) => format!("PC={:04}: {}  [{:?} interrupt]", pc, text, cause),
                    None => format!("PC={:04}: {}", pc, text),
                };
            }
            Err(e) => {
                self.status = format!("Error: {}", e);
                self.running = false;
            }
        }
    }

    /// Run until halt, breakpoint, or error.
    pub fn run(&mut self) {
        self.running = true;
        self.status = "Running...".into();
    }

    /// Run one iteration of continuous execution.
    pub fn tick(&mut self) {
        if !self.running {
            return;
        }

        if !self.cpu.is_running() {
            self.running = false;
            self.status = format!("{:?} after {} cycles", self.cpu.state, self.cpu.cycles);
            if let Some(last) = self.cpu.last_instruction() {
                self.status.push_str(&format!(", last {} at {:04}", last.opcode, last.pc));
            }
            return;
        }

        let pc = self.cpu.regs.pc;
        if self.breakpoints.contains(&pc) {
            self.running = false;
            self.status = format!("Breakpoint at PC={}", pc);
            return;
        }

        self.step();
    }

    /// Toggle breakpoint at current PC.
    pub fn toggle_breakpoint(&mut self) {
        let pc = self.cpu.regs.pc;
        if self.breakpoints.remove(&pc) {
            self.status = format!("Removed breakpoint at PC={}", pc);
        } else {
            self.breakpoints.insert(pc);
            self.status = format!("Set breakpoint at PC={}", pc);
        }
    }

    /// Reset CPU and memory to the loaded program. Breakpoints survive.
    pub fn reset(&mut self) {
        self.cpu = Cpu::new(self.program.memory.clone(), Vec::new(), &self.config);
        self.running = false;
        self.status = "Reset. Ready.".into();
    }

    pub fn scroll_up(&mut self, rows: usize) {
        self.mem_scroll = self.mem_scroll.saturating_sub(rows);
    }

    pub fn scroll_down(&mut self, rows: usize) {
        self.mem_scroll = (self.mem_scroll + rows).min(MEMORY_SIZE as usize - 1);
    }

    /// Flip the memory view between user space and system space.
    pub fn toggle_region(&mut self) {
        let boundary = KERNEL_BOUNDARY as usize;
        self.mem_scroll = if self.mem_scroll < boundary { boundary } else { 0 };
    }

    /// Everything the program has printed so far.
    pub fn output_text(&self) -> String {
        String::from_utf8_lossy(self.cpu.output()).into_owned()
    }

    /// Get disassembly around current PC.
    ///
    /// Instructions are laid out by walking the loaded segments, so operand
    /// words are never shown as opcodes. If PC has wandered outside them the
    /// listing starts at PC instead.
    pub fn get_disassembly(&self, lines: usize) -> Vec<(i32, String, bool)> {
        let pc = self.cpu.regs.pc;
        let memory = self.cpu.port();

        let mut listing = Vec::new();
        for segment in &self.program.segments {
            let mut addr = segment.start;
            while addr < segment.end {
                let (text, words) = disassemble_at(memory, addr);
                listing.push((addr, text));
                addr += words;
            }
        }

        let index = match listing.iter().position(|(addr, _)| *addr == pc) {
            Some(index) => index,
            None => {
                listing.clear();
                let mut addr = pc;
                while listing.len() < lines && (0..MEMORY_SIZE).contains(&addr) {
                    let (text, words) = disassemble_at(memory, addr);
                    listing.push((addr, text));
                    addr += words;
                }
                0
            }
        };

        let start = index.saturating_sub(lines / 2);
        listing
            .into_iter()
            .skip(start)
            .take(lines)
            .map(|(addr, text)| (addr, text, addr == pc))
            .collect()
    }
}

/// Run the debugger with a program.
pub fn run_debugger(program: Program, config: Config) -> std::io::Result<()> {
    use crossterm::{
        event::{self, Event, KeyCode, KeyEventKind},
        terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
        ExecutableCommand,
    };
    use ratatui::prelude::*;
    use std::io::stdout;
    use std::time::Duration;

    // Setup terminal
    enable_raw_mode()?;
    stdout().execute(EnterAlternateScreen)?;
    let mut terminal = Terminal::new(CrosstermBackend::new(stdout()))?;

    let mut app = DebuggerApp::new(program, config);

    loop {
        terminal.draw(|frame| {
            super::ui::draw(frame, &app);
        })?;

        if event::poll(Duration::from_millis(50))? {
            if let Event::Key(key) = event::read()? {
                if key.kind == KeyEventKind::Press {
                    match key.code {
                        KeyCode::Char('q') => app.should_quit = true,
                        KeyCode::Char('s') => {
                            app.running = false;
                            app.step();
                        }
                        KeyCode::Char('r') => app.run(),
                        KeyCode::Char('p') => {
                            app.running = false;
                            app.status = "Paused.".into();
                        }
                        KeyCode::Char('b') => app.toggle_breakpoint(),
                        KeyCode::Char('x') => app.reset(),
                        KeyCode::Char('k') => app.toggle_region(),
                        KeyCode::Up => app.scroll_up(1),
                        KeyCode::Down => app.scroll_down(1),
                        KeyCode::PageUp => app.scroll_up(PAGE),
                        KeyCode::PageDown => app.scroll_down(PAGE),
                        _ => {}
                    }
                }
            }
        }

        if app.running {
            app.tick();
        }

        if app.should_quit {
            break;
        }
    }

    // Restore terminal
    disable_raw_mode()?;
    stdout().execute(LeaveAlternateScreen)?;

    Ok(())
}

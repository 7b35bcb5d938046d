//! Debugger application state and logic.

use crate::asm::disasm::disassemble_instruction;
use crate::config::{ConfigError, SimConfig};
use crate::cpu::memory::WORD_SIZE;
use crate::Cpu;
use std::collections::HashSet;

/// Debugger application state.
pub struct DebuggerApp {
    /// The CPU being debugged.
    pub cpu: Cpu,
    /// Original program for reference.
    pub program: Vec<u32>,
    /// Breakpoints (by virtual address).
    pub breakpoints: HashSet<u32>,
    /// Is the debugger running continuously?
    pub running: bool,
    /// Should we quit?
    pub should_quit: bool,
    /// Status message to display.
    pub status: String,
    /// Memory view scroll offset, in words.
    pub mem_scroll: usize,
}

impl DebuggerApp {
    /// Create a new debugger with a loaded program.
    pub fn new(program: Vec<u32>, config: &SimConfig) -> Result<Self, ConfigError> {
        let cpu = Cpu::new(config)?;
        let mut app = Self {
            cpu,
            program,
            breakpoints: HashSet::new(),
            running: false,
            should_quit: false,
            status: String::new(),
            mem_scroll: 0,
        };
        app.load();
        Ok(app)
    }

    fn load(&mut self) {
        self.status = match self.cpu.load_program(&self.program) {
            Ok(()) => "Ready. Press 's' to step, 'r' to run, 'q' to quit.".into(),
            Err(e) => format!("Load failed: {}", e),
        };
    }

    /// Step one instruction.
    pub fn step(&mut self) {
        if !self.cpu.is_running() {
            self.status = format!("CPU halted: {}", self.halt_text());
            self.running = false;
            return;
        }

        let pc = self.cpu.pc;
        match self.cpu.step() {
            Ok(_) => {
                let disasm = disassemble_instruction(self.cpu.last_word(), pc);
                self.status = format!("PC={:#06x}: {}", pc, disasm);
            }
            Err(e) => {
                self.status = format!("Fault: {}", e);
                self.running = false;
            }
        }
    }

    /// Run until halt, breakpoint, or fault.
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
            self.status = format!("Halted after {} cycles: {}", self.cpu.cycles, self.halt_text());
            return;
        }

        self.step();

        // Stop on the breakpoint before it executes
        let pc = self.cpu.pc;
        if self.running && self.breakpoints.contains(&pc) {
            self.running = false;
            self.status = format!("Breakpoint at PC={:#06x}", pc);
        }
    }

    /// Toggle breakpoint at current PC.
    pub fn toggle_breakpoint(&mut self) {
        let pc = self.cpu.pc;
        if self.breakpoints.remove(&pc) {
            self.status = format!("Removed breakpoint at PC={:#06x}", pc);
        } else {
            self.breakpoints.insert(pc);
            self.status = format!("Set breakpoint at PC={:#06x}", pc);
        }
    }

    /// Reset CPU to initial state, keeping the page table.
    pub fn reset(&mut self) {
        self.cpu.reset();
        self.running = false;
        self.load();
        self.status = format!("Reset. {}", self.status);
    }

    fn halt_text(&self) -> String {
        match self.cpu.halt_reason() {
            Some(reason) => reason.to_string(),
            None => "running".into(),
        }
    }

    /// Get disassembly around current PC as `(addr, text, is_current)`.
    ///
    /// Reads through the page table without disturbing the TLB; unmapped
    /// addresses show as `--`.
    pub fn get_disassembly(&self, lines: usize) -> Vec<(u32, String, bool)> {
        let pc = self.cpu.pc;
        let start = pc.saturating_sub((lines as u32 / 2) * WORD_SIZE);

        (0..lines as u32)
            .filter_map(|i| start.checked_add(i * WORD_SIZE))
            .map(|addr| {
                let text = self
                    .cpu
                    .mmu
                    .peek(addr)
                    .and_then(|phys| self.cpu.mem.read_word(phys).ok())
                    .map(|word| disassemble_instruction(word, addr))
                    .unwrap_or_else(|| "--".into());
                (addr, text, addr == pc)
            })
            .collect()
    }
}

/// Run the debugger with a program.
pub fn run_debugger(program: Vec<u32>, config: SimConfig) -> std::io::Result<()> {
    use crossterm::{
        event::{self, Event, KeyCode, KeyEventKind},
        terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
        ExecutableCommand,
    };
    use ratatui::prelude::*;
    use std::io::stdout;
    use std::time::Duration;

    // Build the app before touching the terminal so config errors print normally
    let mut app = DebuggerApp::new(program, &config)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidInput, e.to_string()))?;

    // Setup terminal
    enable_raw_mode()?;
    stdout().execute(EnterAlternateScreen)?;
    let mut terminal = Terminal::new(CrosstermBackend::new(stdout()))?;

    let max_scroll = (app.cpu.mem.size() / WORD_SIZE as usize).saturating_sub(1);

    // Main loop
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
                        KeyCode::Up => app.mem_scroll = app.mem_scroll.saturating_sub(1),
                        KeyCode::Down => app.mem_scroll = (app.mem_scroll + 1).min(max_scroll),
                        KeyCode::PageUp => app.mem_scroll = app.mem_scroll.saturating_sub(16),
                        KeyCode::PageDown => app.mem_scroll = (app.mem_scroll + 16).min(max_scroll),
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::asm::assemble;

    fn app(source: &str) -> DebuggerApp {
        DebuggerApp::new(assemble(source).unwrap(), &SimConfig::default()).unwrap()
    }

    #[test]
    fn test_step_updates_status() {
        let mut app = app("ADDI r1, r0, 3\nHALT");
        app.step();
        assert_eq!(app.cpu.regs.read(1).unwrap(), 3);
        assert!(app.status.contains("ADDI r1, r0, 3"));
    }

    #[test]
    fn test_breakpoint_stops_run() {
        let mut app = app("NOP\nNOP\nNOP\nHALT");
        app.cpu.pc = 8;
        app.toggle_breakpoint();
        app.cpu.pc = 0;

        app.run();
        while app.running {
            app.tick();
        }
        assert_eq!(app.cpu.pc, 8);
        assert!(app.cpu.is_running());
    }

    #[test]
    fn test_reset_reloads_program() {
        let mut app = app("ADDI r1, r0, 9\nHALT");
        app.run();
        while app.running {
            app.tick();
        }
        assert!(app.cpu.is_halted());

        app.reset();
        assert!(app.cpu.is_running());
        assert_eq!(app.cpu.pc, 0);
        assert_eq!(app.cpu.regs.read(1).unwrap(), 0);
        assert_eq!(app.get_disassembly(2)[0].1, "ADDI r1, r0, 9");
    }

    #[test]
    fn test_disassembly_marks_pc() {
        let app = app("NOP\nHALT");
        let lines = app.get_disassembly(4);
        assert_eq!(lines[0], (0, "NOP".to_string(), true));
        assert_eq!(lines[1].1, "HALT");
    }
}

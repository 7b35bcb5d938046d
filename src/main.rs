//! cycle-sim - CLI Entry Point
//!
//! Commands:
//! - `cycle-sim run <program>` - Run an image or ASM file
//! - `cycle-sim debug <program>` - Interactive debugger
//! - `cycle-sim asm <source>` - Assemble to a hex image
//! - `cycle-sim disasm <image>` - Disassemble an image
//! - `cycle-sim test` - Built-in self-test

use clap::{Parser, Subcommand};
use cyclesim::{Cpu, SimConfig};

#[derive(Parser)]
#[command(name = "cycle-sim")]
#[command(version)]
#[command(about = "An instruction-cycle simulator with paging and a TLB, for teaching")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a program until it halts or the step budget runs out
    Run {
        /// Path to the image or ASM file to execute
        program: String,
        /// JSON configuration file
        #[arg(short, long)]
        config: Option<String>,
        /// Maximum number of instructions to retire
        #[arg(short, long, default_value = "10000")]
        max_steps: u64,
        /// Print every retired instruction
        #[arg(short, long)]
        trace: bool,
        /// Print the result as JSON
        #[arg(long)]
        json: bool,
        /// Enable paging (identity-mapped unless the config has mappings)
        #[arg(long)]
        paging: bool,
    },
    /// Interactive debugger
    #[cfg(feature = "tui")]
    Debug {
        /// Path to the image or ASM file to debug
        program: String,
        /// JSON configuration file
        #[arg(short, long)]
        config: Option<String>,
        /// Enable paging (identity-mapped unless the config has mappings)
        #[arg(long)]
        paging: bool,
    },
    /// Assemble source to a hex image
    Asm {
        /// Path to the source file
        source: String,
        /// Output image file
        #[arg(short, long)]
        output: Option<String>,
    },
    /// Disassemble an image to readable text
    Disasm {
        /// Path to the image file
        image: String,
    },
    /// Run the built-in self-test
    Test,
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let cli = Cli::parse();

    match cli.command {
        Some(Commands::Run { program, config, max_steps, trace, json, paging }) => {
            run_program(&program, config.as_deref(), max_steps, trace, json, paging);
        }
        #[cfg(feature = "tui")]
        Some(Commands::Debug { program, config, paging }) => {
            debug_program(&program, config.as_deref(), paging);
        }
        Some(Commands::Asm { source, output }) => {
            assemble_file(&source, output);
        }
        Some(Commands::Disasm { image }) => {
            disassemble_file(&image);
        }
        Some(Commands::Test) => {
            run_self_test();
        }
        None => {
            println!("cycle-sim v{}", env!("CARGO_PKG_VERSION"));
            println!("A fetch/decode/execute/write-back simulator with a TLB");
            println!();
            println!("Use --help for available commands");
        }
    }
}

/// Read a program, assembling `.asm` files first.
fn load_program_words(path: &str, quiet: bool) -> Vec<u32> {
    use cyclesim::{assemble, load_image};

    let words = if path.ends_with(".asm") {
        let source = match std::fs::read_to_string(path) {
            Ok(s) => s,
            Err(e) => {
                eprintln!("❌ Failed to read file: {}", e);
                std::process::exit(1);
            }
        };

        match assemble(&source) {
            Ok(words) => {
                if !quiet {
                    println!("📝 Assembled {} words", words.len());
                }
                words
            }
            Err(e) => {
                eprintln!("❌ Assembly error: {}", e);
                std::process::exit(1);
            }
        }
    } else {
        match load_image(path) {
            Ok(image) => {
                if !quiet {
                    println!("📂 Loaded {} words", image.len());
                }
                image.words
            }
            Err(e) => {
                eprintln!("❌ Failed to load image: {}", e);
                std::process::exit(1);
            }
        }
    };

    if words.is_empty() {
        eprintln!("❌ No instructions to execute");
        std::process::exit(1);
    }

    words
}

/// Load the configuration file (or defaults) and apply CLI overrides.
fn load_config(path: Option<&str>, paging: bool) -> SimConfig {
    let mut config = match path {
        Some(path) => match SimConfig::from_json_file(path) {
            Ok(config) => config,
            Err(e) => {
                eprintln!("❌ Invalid configuration: {}", e);
                std::process::exit(1);
            }
        },
        None => SimConfig::default(),
    };
    if paging {
        config.paging = true;
    }
    config
}

/// Paging without explicit mappings gets an identity map of all memory.
fn identity_mapped(config: &SimConfig) -> SimConfig {
    let mut config = config.clone();
    if config.paging && config.page_map.is_empty() {
        let pages = config.memory_size.div_ceil(config.page_size as usize) as u32;
        config.page_map = (0..pages)
            .map(|page| cyclesim::PageMapping { vpn: page, pfn: page })
            .collect();
    }
    config
}

fn build_cpu(config: &SimConfig) -> Cpu {
    match Cpu::new(&identity_mapped(config)) {
        Ok(cpu) => cpu,
        Err(e) => {
            eprintln!("❌ Invalid configuration: {}", e);
            std::process::exit(1);
        }
    }
}

fn run_program(path: &str, config: Option<&str>, max_steps: u64, trace: bool, json: bool, paging: bool) {
    use cyclesim::asm::disasm::format_instruction;

    if !json {
        println!("🔧 Running: {}", path);
    }

    let words = load_program_words(path, json);
    let config = load_config(config, paging);
    let mut cpu = build_cpu(&config);

    if let Err(e) = cpu.load_program(&words) {
        eprintln!("❌ Failed to load program: {}", e);
        std::process::exit(1);
    }

    if !json {
        println!();
        println!("━━━ Execution ━━━");
    }

    let result = if trace && !json {
        let mut steps = cpu.trace(max_steps);
        for entry in steps.by_ref() {
            println!(
                "{:>6} {:#06x}: {:<24} {}",
                entry.cycle,
                entry.pc,
                format_instruction(&entry.instruction, entry.pc),
                entry.flags
            );
        }
        steps.finish()
    } else {
        cpu.run(max_steps)
    };

    if json {
        let report = serde_json::json!({
            "result": result,
            "registers": cpu.regs.as_slice(),
            "cycles": cpu.cycles,
            "tlb": cpu.mmu.stats(),
        });
        match serde_json::to_string_pretty(&report) {
            Ok(text) => println!("{}", text),
            Err(e) => {
                eprintln!("❌ Failed to encode result: {}", e);
                std::process::exit(1);
            }
        }
    } else {
        println!();
        println!("━━━ Result ━━━");
        println!("Reason: {}", result.reason);
        println!("Steps:  {}", result.steps);
        println!("PC:     {:#010x}", result.pc);
        println!("Flags:  {}", result.flags);
        for (i, value) in cpu.regs.as_slice().iter().enumerate() {
            if *value != 0 {
                println!("r{:<2} = {:#010x} ({})", i, value, *value as i32);
            }
        }
        if cpu.mmu.paging() {
            let stats = cpu.mmu.stats();
            println!(
                "TLB:    {} hits, {} misses, {} evictions",
                stats.tlb_hits, stats.tlb_misses, stats.evictions
            );
        }

        if result.reason == cyclesim::HaltReason::StepBudgetExhausted {
            println!();
            println!("⚠️  Reached the step budget ({}). Use --max-steps to increase.", max_steps);
        }
    }

    if result.reason.is_fault() {
        if !json {
            eprintln!("❌ CPU fault at PC={:#010x}: {}", result.pc, result.reason);
        }
        std::process::exit(1);
    }
}

#[cfg(feature = "tui")]
fn debug_program(path: &str, config: Option<&str>, paging: bool) {
    use cyclesim::tui::run_debugger;

    println!("🔍 Loading: {}", path);

    let words = load_program_words(path, false);
    let config = identity_mapped(&load_config(config, paging));

    println!("🚀 Launching debugger...");
    println!();

    if let Err(e) = run_debugger(words, config) {
        eprintln!("❌ Debugger error: {}", e);
        std::process::exit(1);
    }
}

fn assemble_file(source_path: &str, output: Option<String>) {
    use cyclesim::{assemble, save_image, ProgramImage};

    let out_path = output.unwrap_or_else(|| match source_path.strip_suffix(".asm") {
        Some(stem) => format!("{}.hex", stem),
        None => format!("{}.hex", source_path),
    });

    println!("📝 Assembling: {} → {}", source_path, out_path);

    let source = match std::fs::read_to_string(source_path) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("❌ Failed to read file: {}", e);
            std::process::exit(1);
        }
    };

    let words = match assemble(&source) {
        Ok(words) => words,
        Err(e) => {
            eprintln!("❌ Assembly error: {}", e);
            std::process::exit(1);
        }
    };

    println!("✓ Assembled {} words", words.len());

    if let Err(e) = save_image(&out_path, &ProgramImage::from_words(&words)) {
        eprintln!("❌ Failed to save image: {}", e);
        std::process::exit(1);
    }

    println!("✓ Saved to {}", out_path);
}

fn disassemble_file(image_path: &str) {
    use cyclesim::load_image;
    use cyclesim::asm::disasm::disassemble;
    use cyclesim::cpu::execute::LOAD_BASE;

    println!("📖 Disassembling: {}", image_path);
    println!();

    let image = match load_image(image_path) {
        Ok(image) => image,
        Err(e) => {
            eprintln!("❌ Failed to load image: {}", e);
            std::process::exit(1);
        }
    };

    println!("{}", disassemble(&image.words, LOAD_BASE));
}

fn run_self_test() {
    use cyclesim::{assemble, HaltReason};

    println!("━━━ cycle-sim Self-Test ━━━");
    println!();

    let mut passed = 0;
    let mut failed = 0;

    let mut check = |name: &str, ok: bool| {
        print!("{}... ", name);
        if ok {
            println!("✓");
            passed += 1;
        } else {
            println!("✗");
            failed += 1;
        }
    };

    // Test 1: ADD and HALT
    let mut cpu = Cpu::default();
    let _ = cpu.regs.write(2, 5);
    let _ = cpu.regs.write(3, 7);
    let ok = assemble("ADD r1, r2, r3\nHALT")
        .ok()
        .and_then(|words| cpu.load_program(&words).ok())
        .map(|()| cpu.run(10))
        .is_some_and(|result| {
            result.reason == HaltReason::Completed && cpu.regs.read(1).ok() == Some(12) && !result.flags.zero
        });
    check("ADD r1, r2, r3", ok);

    // Test 2: out-of-bounds load leaves the destination alone
    let mut cpu = Cpu::default();
    let _ = cpu.regs.write(2, 0xffff_fff0);
    let ok = assemble("LW r1, [r2+4]\nHALT")
        .ok()
        .and_then(|words| cpu.load_program(&words).ok())
        .map(|()| cpu.run(10))
        .is_some_and(|result| {
            matches!(result.reason, HaltReason::OutOfBounds { .. })
                && result.pc == 0
                && cpu.regs.read(1).ok() == Some(0)
        });
    check("Out-of-bounds load faults precisely", ok);

    // Test 3: zero budget changes nothing
    let mut cpu = Cpu::default();
    let result = cpu.run(0);
    check(
        "Zero step budget",
        result.reason == HaltReason::StepBudgetExhausted && result.steps == 0 && cpu.pc == 0,
    );

    // Test 4: counting loop
    let mut cpu = Cpu::default();
    let ok = assemble("ADDI r1, r0, 10\nloop: ADDI r2, r2, 3\nSUBI r1, r1, 1\nCMPI r1, 0\nBNE loop\nHALT")
        .ok()
        .and_then(|words| cpu.load_program(&words).ok())
        .map(|()| cpu.run(1000))
        .is_some_and(|result| result.reason == HaltReason::Completed && cpu.regs.read(2).ok() == Some(30));
    check("Counting loop", ok);

    // Test 5: paging through a TLB
    let config = identity_mapped(&SimConfig { paging: true, ..SimConfig::default() });
    let ok = Cpu::new(&config)
        .ok()
        .and_then(|mut cpu| {
            let words = assemble("LI r1, 0x2000\nSW r1, [r1]\nLW r2, [r1]\nHALT").ok()?;
            cpu.load_program(&words).ok()?;
            let result = cpu.run(10);
            Some(result.reason == HaltReason::Completed && cpu.regs.read(2).ok() == Some(0x2000) && cpu.mmu.stats().tlb_hits > 0)
        })
        .unwrap_or(false);
    check("Paged store/load", ok);

    println!();
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    println!("Results: {} passed, {} failed", passed, failed);

    if failed == 0 {
        println!("✓ All tests passed!");
    } else {
        std::process::exit(1);
    }
}

//! Command-line front end for the unpyc decompiler.
//!
//! A thin front end: read the file, call the library, print the result.
//! `--disasm` lists instructions, `--cfg` dumps the control-flow graphs
//! as JSON, `--test` re-runs the decompiler and checks determinism,
//! `--golden` compares against a sibling `.py` file. Default decompiles.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{bail, Context, Result};
use clap::Parser;
use similar::TextDiff;

use unpyc::{all_code_objects, build_graph, decompile, decompile_code, disassemble, parse_pyc};

#[derive(Parser, Debug)]
#[command(name = "unpyc", about = "Decompile CPython bytecode (1.0 through 3.14)", version)]
struct Args {
    /// Print a disassembly listing instead of decompiling.
    #[arg(long, conflicts_with_all = ["cfg", "test", "golden"])]
    disasm: bool,

    /// Dump the control-flow analysis as JSON.
    #[arg(long, conflicts_with_all = ["disasm", "test", "golden"])]
    cfg: bool,

    /// Run the self-check harness on the file.
    #[arg(long, conflicts_with_all = ["disasm", "cfg", "golden"])]
    test: bool,

    /// Compare decompiled output against the sibling .py file.
    #[arg(long, conflicts_with_all = ["disasm", "cfg", "test"])]
    golden: bool,

    /// The .pyc file to process.
    file: PathBuf,
}

fn main() -> ExitCode {
    env_logger::init();
    let args = Args::parse();
    match run(&args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            eprintln!("error: {error:#}");
            ExitCode::FAILURE
        }
    }
}

fn run(args: &Args) -> Result<()> {
    let data = fs::read(&args.file).with_context(|| format!("reading {}", args.file.display()))?;

    if args.disasm {
        return disasm_mode(&data);
    }
    if args.cfg {
        return cfg_mode(&data);
    }
    if args.test {
        return test_mode(&data);
    }
    if args.golden {
        return golden_mode(&data, &args.file);
    }

    let result = decompile(&data)?;
    for diagnostic in &result.diagnostics {
        log::warn!("{diagnostic}");
    }
    print!("{}", result.source);
    Ok(())
}

fn disasm_mode(data: &[u8]) -> Result<()> {
    let pyc = parse_pyc(data)?;
    let listing = disassemble(pyc.version, &pyc.code)?;
    print!("{listing}");
    Ok(())
}

fn cfg_mode(data: &[u8]) -> Result<()> {
    let pyc = parse_pyc(data)?;
    let mut dump = Vec::new();
    for code in all_code_objects(&pyc.code) {
        let graph = build_graph(pyc.version, &code)?;
        dump.push(serde_json::json!({
            "name": code.name,
            "qualname": code.qualname,
            "firstlineno": code.firstlineno,
            "blocks": graph.blocks,
        }));
    }
    println!("{}", serde_json::to_string_pretty(&dump)?);
    Ok(())
}

/// Self-check: decoding invariants hold and output is deterministic.
fn test_mode(data: &[u8]) -> Result<()> {
    let pyc = parse_pyc(data)?;

    for code in all_code_objects(&pyc.code) {
        // Every instruction decodes, and operand indices stay in range
        // for the table they address.
        for insn in unpyc::decode_all(pyc.version, &code.code)? {
            use unpyc::Opcode;
            let in_range = match insn.opcode {
                Opcode::LoadConst | Opcode::ReturnConst => code.constant(insn.arg).is_some(),
                Opcode::LoadName | Opcode::StoreName | Opcode::DeleteName => code.name(insn.arg).is_some(),
                Opcode::LoadFast | Opcode::StoreFast | Opcode::DeleteFast => code.varname(insn.arg).is_some(),
                _ => true,
            };
            if !in_range {
                bail!(
                    "{}: operand {} out of range at offset {} ({})",
                    code.name,
                    insn.arg,
                    insn.offset,
                    insn.opcode
                );
            }
        }
    }

    let first = decompile_code(pyc.version, &pyc.code);
    let second = decompile_code(pyc.version, &pyc.code);
    if first.source != second.source {
        bail!("decompilation is not deterministic");
    }
    println!("ok: {} code objects, {} diagnostics", all_code_objects(&pyc.code).len(), first.diagnostics.len());
    Ok(())
}

fn golden_mode(data: &[u8], pyc_path: &Path) -> Result<()> {
    let golden_path = pyc_path.with_extension("py");
    let expected = fs::read_to_string(&golden_path)
        .with_context(|| format!("reading golden file {}", golden_path.display()))?;

    let result = decompile(data)?;
    if result.source == expected {
        println!("ok: {}", golden_path.display());
        return Ok(());
    }

    let diff = TextDiff::from_lines(expected.as_str(), result.source.as_str());
    eprint!("{}", diff.unified_diff().header("expected", "decompiled"));
    bail!("output differs from {}", golden_path.display());
}

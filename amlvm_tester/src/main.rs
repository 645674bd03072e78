/*
 * Test harness for running artificial AML through the interpreter. It scans a
 * directory (or takes individual files), compiles any ASL it finds with
 * `iasl`, loads each resulting AML table, and invokes a `\MAIN` method if the
 * table defines one. Results are printed in a `cargo test`-style table.
 */

use amlvm::{AmlError, AmlName, Interpreter};
use clap::{Arg, ArgAction, ArgGroup};
use std::{
    collections::HashSet,
    ffi::OsStr,
    fs::{self, File},
    io::{Read, Write},
    path::{Path, PathBuf},
    process::Command,
    str::FromStr,
};

enum CompilationOutcome {
    Ignored,
    IsAml(PathBuf),
    Newer(PathBuf),
    NotCompiled(PathBuf),
    Failed(PathBuf),
    Succeeded(PathBuf),
}

#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
enum TestResult {
    Pass,
    CompileFail,
    RunFail,
    NotCompiled,
}

fn main() -> std::io::Result<()> {
    let mut cmd = clap::Command::new("amlvm_tester")
        .version("v0.1.0")
        .about("Compiles ASL test files and runs them through the AML interpreter")
        .arg(Arg::new("no_compile").long("no-compile").action(ArgAction::SetTrue).help("Don't compile ASL to AML"))
        .arg(
            Arg::new("combined")
                .long("combined")
                .action(ArgAction::SetTrue)
                .help("Don't clear the namespace between tests"),
        )
        .arg(Arg::new("path").short('p').long("path").required(false).action(ArgAction::Set).value_name("DIR"))
        .arg(Arg::new("files").action(ArgAction::Append).value_name("FILE.{asl,aml}"))
        .group(ArgGroup::new("files_list").args(["path", "files"]).required(true));
    if std::env::args().count() <= 1 {
        cmd.print_help()?;
        return Ok(());
    }
    log::set_logger(&Logger).unwrap();
    log::set_max_level(log::LevelFilter::Trace);

    let matches = cmd.get_matches();

    let user_wants_compile = !matches.get_flag("no_compile");
    let can_compile = user_wants_compile &&
        // Test if `iasl` is installed, so we can give a good error later if it's not
        match Command::new("iasl").arg("-v").status() {
            Ok(exit_status) if exit_status.success() => true,
            Ok(exit_status) => {
                panic!("`iasl` exited with unsuccessful status: {:?}", exit_status);
            },
            Err(_) => false,
    };

    let tests = find_tests(&matches)?;
    let compiled_files: Vec<CompilationOutcome> =
        tests.iter().map(|name| resolve_and_compile(name, can_compile).unwrap()).collect();

    if user_wants_compile
        && compiled_files.iter().any(|outcome| matches!(outcome, CompilationOutcome::NotCompiled(_)))
    {
        panic!(
            "`iasl` is not installed, but we want to compile some ASL files! Pass --no-compile, or install `iasl`"
        );
    }
    if user_wants_compile {
        let (passed, failed) = compiled_files.iter().fold((0, 0), |(passed, failed), outcome| match outcome {
            CompilationOutcome::Succeeded(_) => (passed + 1, failed),
            CompilationOutcome::Failed(_) => (passed, failed + 1),
            _ => (passed, failed),
        });
        if passed + failed > 0 {
            println!(
                "Compiled {} ASL files: {}{} passed{}, {}{} failed{}",
                passed + failed,
                termion::color::Fg(termion::color::Green),
                passed,
                termion::style::Reset,
                termion::color::Fg(termion::color::Red),
                failed,
                termion::style::Reset
            );
            println!();
        }
    }

    // Files can be named both directly and via their directory - only run each once
    let mut dedup_list: HashSet<PathBuf> = HashSet::new();
    let mut summaries: HashSet<(PathBuf, TestResult)> = HashSet::new();
    let aml_files = compiled_files
        .iter()
        .filter_map(|outcome| match outcome {
            CompilationOutcome::IsAml(path) => Some(path.clone()),
            CompilationOutcome::Newer(path) => Some(path.clone()),
            CompilationOutcome::Succeeded(path) => Some(path.clone()),
            CompilationOutcome::Failed(path) => {
                summaries.insert((path.clone(), TestResult::CompileFail));
                None
            }
            CompilationOutcome::NotCompiled(path) => {
                summaries.insert((path.clone(), TestResult::NotCompiled));
                None
            }
            CompilationOutcome::Ignored => None,
        })
        .filter(|path| dedup_list.insert(path.clone()))
        .collect::<Vec<_>>();

    let combined_test = matches.get_flag("combined");

    let mut interpreter = Interpreter::new(EnvironmentHandler, 2);

    let (passed, failed) = aml_files.into_iter().fold((0, 0), |(passed, failed), file_entry| {
        print!("Testing AML file: {:?}... ", file_entry);
        std::io::stdout().flush().unwrap();

        let Ok(mut file) = File::open(&file_entry) else {
            summaries.insert((file_entry, TestResult::CompileFail));
            return (passed, failed + 1);
        };
        let mut contents = Vec::new();
        file.read_to_end(&mut contents).unwrap();

        if !combined_test {
            interpreter = Interpreter::new(EnvironmentHandler, 2);
        }

        const AML_TABLE_HEADER_LENGTH: usize = 36;
        let stream = &contents[AML_TABLE_HEADER_LENGTH..];

        match run_test(stream, &interpreter) {
            Ok(()) => {
                println!("{}OK{}", termion::color::Fg(termion::color::Green), termion::style::Reset);
                println!("Namespace: {:?}", interpreter.namespace.lock());
                summaries.insert((file_entry, TestResult::Pass));
                (passed + 1, failed)
            }

            Err(err) => {
                println!("{}Failed ({:?}){}", termion::color::Fg(termion::color::Red), err, termion::style::Reset);
                println!("Namespace: {:?}", interpreter.namespace.lock());
                summaries.insert((file_entry, TestResult::RunFail));
                (passed, failed + 1)
            }
        }
    });

    println!("Summary:");
    for (file, status) in summaries.iter() {
        let status = match status {
            TestResult::Pass => {
                format!("{}OK{}", termion::color::Fg(termion::color::Green), termion::style::Reset)
            }
            TestResult::CompileFail => {
                format!("{}COMPILE FAIL{}", termion::color::Fg(termion::color::Red), termion::style::Reset)
            }
            TestResult::RunFail => {
                format!("{}RUN FAIL{}", termion::color::Fg(termion::color::Red), termion::style::Reset)
            }
            TestResult::NotCompiled => {
                format!("{}NOT COMPILED{}", termion::color::Fg(termion::color::Red), termion::style::Reset)
            }
        };
        println!("\t{:<50}: {}", file.to_str().unwrap(), status);
    }
    println!(
        "\nTest results: {}{} passed{}, {}{} failed{}",
        termion::color::Fg(termion::color::Green),
        passed,
        termion::style::Reset,
        termion::color::Fg(termion::color::Red),
        failed,
        termion::style::Reset
    );
    Ok(())
}

fn run_test(stream: &[u8], interpreter: &Interpreter) -> Result<(), AmlError> {
    interpreter.load_table(stream)?;

    let main = AmlName::from_str("\\MAIN").unwrap();
    match interpreter.evaluate(&main, vec![]) {
        Ok(_) => Ok(()),
        Err(AmlError::ObjectDoesNotExist(name)) if name == main => Ok(()),
        Err(other) => Err(other),
    }
}

fn find_tests(matches: &clap::ArgMatches) -> std::io::Result<Vec<PathBuf>> {
    let files: Vec<PathBuf> = if matches.contains_id("path") {
        let dir_path = Path::new(matches.get_one::<String>("path").unwrap());

        if fs::metadata(dir_path)?.is_dir() {
            println!("Running tests in directory: {:?}", dir_path);
            fs::read_dir(dir_path)?.filter_map(|entry| Some(entry.ok()?.path())).collect()
        } else {
            println!("Running single test: {:?}", dir_path);
            vec![dir_path.to_path_buf()]
        }
    } else {
        matches.get_many::<String>("files").unwrap_or_default().map(PathBuf::from).collect()
    };

    // Make sure all files exist, propagate error if it occurs
    files.iter().fold(Ok(()), |result: std::io::Result<()>, path| {
        if !path.is_file() {
            println!("Not a regular file: {}", path.display());
            path.metadata()?;
        }
        result
    })?;

    Ok(files)
}

/// Determine what to do with this file - ignore, compile and run, or just run.
/// If ".aml" does not exist, or if ".asl" is newer, compiles the file.
/// If the ".aml" file is newer, indicate it is ready to run.
fn resolve_and_compile(path: &PathBuf, can_compile: bool) -> std::io::Result<CompilationOutcome> {
    if path.extension() == Some(OsStr::new("aml")) && path.metadata()?.is_file() {
        return Ok(CompilationOutcome::IsAml(path.clone()));
    }

    if path.extension() != Some(OsStr::new("asl")) || !path.metadata()?.is_file() {
        return Ok(CompilationOutcome::Ignored);
    }

    let aml_path = path.with_extension("aml");

    if aml_path.is_file() {
        let asl_last_modified = path.metadata()?.modified()?;
        let aml_last_modified = aml_path.metadata()?.modified()?;
        if asl_last_modified <= aml_last_modified {
            return Ok(CompilationOutcome::Newer(aml_path));
        }
    }

    if !can_compile {
        return Ok(CompilationOutcome::NotCompiled(path.clone()));
    }

    println!("Compiling file: {}", path.display());
    let output = Command::new("iasl").arg(path).output()?;

    if !output.status.success() {
        println!(
            "Failed to compile ASL file: {}. Output from iasl:\n {}",
            path.display(),
            String::from_utf8_lossy(&output.stderr)
        );
        Ok(CompilationOutcome::Failed(path.clone()))
    } else {
        Ok(CompilationOutcome::Succeeded(aml_path))
    }
}

struct Logger;

impl log::Log for Logger {
    fn enabled(&self, _: &log::Metadata) -> bool {
        true
    }

    fn log(&self, record: &log::Record) {
        println!("[{}] {}", record.level(), record.args());
    }

    fn flush(&self) {
        std::io::stdout().flush().unwrap();
    }
}

/// Logs every access the interpreter makes and hands back zeroes - artificial
/// AML doesn't run on real hardware, we just want to see what it touches.
struct EnvironmentHandler;

impl amlvm::Handler for EnvironmentHandler {
    fn read_u8(&self, address: usize) -> u8 {
        println!("read_u8 {address:#x}");
        0
    }
    fn read_u16(&self, address: usize) -> u16 {
        println!("read_u16 {address:#x}");
        0
    }
    fn read_u32(&self, address: usize) -> u32 {
        println!("read_u32 {address:#x}");
        0
    }
    fn read_u64(&self, address: usize) -> u64 {
        println!("read_u64 {address:#x}");
        0
    }

    fn write_u8(&self, address: usize, value: u8) {
        println!("write_u8 {address:#x}<-{value:#x}");
    }
    fn write_u16(&self, address: usize, value: u16) {
        println!("write_u16 {address:#x}<-{value:#x}");
    }
    fn write_u32(&self, address: usize, value: u32) {
        println!("write_u32 {address:#x}<-{value:#x}");
    }
    fn write_u64(&self, address: usize, value: u64) {
        println!("write_u64 {address:#x}<-{value:#x}");
    }

    fn read_io_u8(&self, port: u16) -> u8 {
        println!("read_io_u8 {port:#x}");
        0
    }
    fn read_io_u16(&self, port: u16) -> u16 {
        println!("read_io_u16 {port:#x}");
        0
    }
    fn read_io_u32(&self, port: u16) -> u32 {
        println!("read_io_u32 {port:#x}");
        0
    }

    fn write_io_u8(&self, port: u16, value: u8) {
        println!("write_io_u8 {port:#x}<-{value:#x}");
    }
    fn write_io_u16(&self, port: u16, value: u16) {
        println!("write_io_u16 {port:#x}<-{value:#x}");
    }
    fn write_io_u32(&self, port: u16, value: u32) {
        println!("write_io_u32 {port:#x}<-{value:#x}");
    }

    fn read_pci_u8(&self, segment: u16, bus: u8, device: u8, function: u8, offset: u16) -> u8 {
        println!("read_pci_u8 {segment:#x}:{bus:#x}:{device:#x}.{function:#x} @ {offset:#x}");
        0
    }
    fn read_pci_u16(&self, segment: u16, bus: u8, device: u8, function: u8, offset: u16) -> u16 {
        println!("read_pci_u16 {segment:#x}:{bus:#x}:{device:#x}.{function:#x} @ {offset:#x}");
        0
    }
    fn read_pci_u32(&self, segment: u16, bus: u8, device: u8, function: u8, offset: u16) -> u32 {
        println!("read_pci_u32 {segment:#x}:{bus:#x}:{device:#x}.{function:#x} @ {offset:#x}");
        0
    }

    fn write_pci_u8(&self, segment: u16, bus: u8, device: u8, function: u8, offset: u16, value: u8) {
        println!("write_pci_u8 {segment:#x}:{bus:#x}:{device:#x}.{function:#x} @ {offset:#x}<-{value:#x}");
    }
    fn write_pci_u16(&self, segment: u16, bus: u8, device: u8, function: u8, offset: u16, value: u16) {
        println!("write_pci_u16 {segment:#x}:{bus:#x}:{device:#x}.{function:#x} @ {offset:#x}<-{value:#x}");
    }
    fn write_pci_u32(&self, segment: u16, bus: u8, device: u8, function: u8, offset: u16, value: u32) {
        println!("write_pci_u32 {segment:#x}:{bus:#x}:{device:#x}.{function:#x} @ {offset:#x}<-{value:#x}");
    }

    fn nanos_since_boot(&self) -> u64 {
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|duration| duration.as_nanos() as u64)
            .unwrap_or(0)
    }

    fn stall(&self, microseconds: u64) {
        println!("Stalling for {}us", microseconds);
    }
    fn sleep(&self, milliseconds: u64) {
        println!("Sleeping for {}ms", milliseconds);
        std::thread::sleep(std::time::Duration::from_millis(milliseconds));
    }
}

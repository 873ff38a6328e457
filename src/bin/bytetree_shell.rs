//! bytetree shell — interactive low-level editor.
//!
//! A line-oriented shell over the editor core: navigate any binary
//! artifact as a tree of addressable objects, read and splice byte
//! ranges, and save the layered edits back to disk.
//!
//! Usage:
//!   bytetree [start-dsid]
//!
//! Long-running reads execute on worker threads; Ctrl-C cancels the
//! foreground job cleanly (jobs started with a trailing `&` keep running
//! and are listed by `jobs`).

use std::collections::HashMap;
use std::io::{BufRead, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context};

use bytetree::jobs::{JobHandle, WorkerPool};
use bytetree::progress;
use bytetree::range::ALL;
use bytetree::{ByteRange, DataStore, Dsid, EditError, Key, RefTag, Session};

const CWD_TAG: &str = "<current object>";

struct Shell {
    session: Session,
    cwd: Arc<DataStore>,
    pool: WorkerPool,
    interrupt: Arc<AtomicBool>,
    background: Vec<JobHandle<Vec<u8>>>,
    named: HashMap<String, Arc<DataStore>>,
    quit: bool,
}

fn help_text(topic: Option<&str>) -> String {
    match topic {
        None | Some("help") => "\
The most broadly useful commands are:
   quit        Quit the shell
   ls          Find out where you can go
   cd          Change where you are
   read        View the data in an object (usually a file)
   write       Modify the data in an object
   save        Save your changes
   open        Create a name for an object
   close       Remove your name for an object
   jobs        List background jobs
   pwd         Print the id of the current object

Append & to a read to keep it in the background."
            .into(),
        Some("read") => "usage: read [dsid] [range] [&]\n\n\
View the data in an object. Ranges look like 4..6 or 8... ; the default\n\
is the whole object. Output is a hex dump."
            .into(),
        Some("write") => "usage: write <dsid> <range> <data>\n\n\
Replace the bytes in <range> with <data>. Data starting with 0x is read\n\
as hex; anything else is taken literally (quote to protect spaces).\n\
Edits stay in scratch storage until `save`."
            .into(),
        Some("save") => "usage: save [dsid]\n\n\
Write pending edits back to disk. With no argument, saves every\n\
modified object in the session."
            .into(),
        Some(other) => format!("No help for \"{other}\". Try \"help\"."),
    }
}

/// Split on spaces, re-joining tokens whose quote count is odd so spaces
/// survive inside quoted dsid components.
fn split_command(line: &str) -> Vec<String> {
    let mut args: Vec<String> = line.split(' ').map(str::to_owned).collect();
    let mut i = 0;
    while i + 1 < args.len() {
        if args[i].matches('"').count() % 2 == 1 {
            let next = args.remove(i + 1);
            args[i] = format!("{} {}", args[i], next);
        } else {
            i += 1;
        }
    }
    args.retain(|arg| !arg.is_empty());
    args
}

fn hex_dump(bytes: &[u8], out: &mut impl Write) -> std::io::Result<()> {
    for (row, chunk) in bytes.chunks(16).enumerate() {
        let hex: Vec<String> = chunk.iter().map(|b| format!("{b:02x}")).collect();
        let ascii: String = chunk
            .iter()
            .map(|&b| if (0x20..=0x7e).contains(&b) { b as char } else { '.' })
            .collect();
        writeln!(out, "{:08x}  {:<47}  {ascii}", row * 16, hex.join(" "))?;
    }
    Ok(())
}

impl Shell {
    fn new(start: Option<&str>) -> anyhow::Result<Self> {
        let session = Session::new()?;
        let worker_cap = session.tuning().worker_cap;

        let start_text = match start {
            Some(text) => text.to_owned(),
            None => {
                let cwd = std::env::current_dir().context("cannot determine working directory")?;
                format!("/FileSystem/\"{}\"", cwd.display())
            }
        };
        let cwd = session
            .open_text(&start_text, RefTag::label(CWD_TAG))
            .with_context(|| format!("cannot open {start_text}"))?;

        let interrupt = Arc::new(AtomicBool::new(false));
        signal_hook::flag::register(signal_hook::consts::SIGINT, Arc::clone(&interrupt))
            .context("cannot install SIGINT handler")?;

        Ok(Shell {
            session,
            cwd,
            pool: WorkerPool::new(worker_cap),
            interrupt,
            background: Vec::new(),
            named: HashMap::new(),
            quit: false,
        })
    }

    /// Resolve a dsid argument: absolute stands alone, relative joins the
    /// current object.
    fn resolve(&self, text: &str) -> anyhow::Result<Dsid> {
        let parsed = self.session.parse_dsid(text)?;
        if parsed.absolute {
            Ok(Dsid::new(parsed.keys))
        } else {
            Ok(self.cwd.dsid().join(&parsed.keys))
        }
    }

    /// A lone range argument like `4..6` or `8...`.
    fn parse_range(&self, text: &str) -> anyhow::Result<ByteRange> {
        let parsed = self.session.parse_dsid(text)?;
        match parsed.keys.as_slice() {
            [Key::Range(range)] if !parsed.absolute => Ok(*range),
            _ => Err(anyhow!("expected a range like 4..6 or 8..., got {text}")),
        }
    }

    fn run(&mut self) -> anyhow::Result<()> {
        println!("bytetree shell");
        println!("Type \"help\" for more information");

        let stdin = std::io::stdin();
        let mut lines = stdin.lock().lines();
        while !self.quit {
            print!("{}> ", self.cwd.dsid());
            std::io::stdout().flush()?;

            let line = match lines.next() {
                Some(Ok(line)) => line,
                Some(Err(err)) if err.kind() == std::io::ErrorKind::Interrupted => {
                    self.interrupt.store(false, Ordering::Relaxed);
                    println!("Type \"quit\" if you really want to quit now");
                    continue;
                }
                Some(Err(err)) => return Err(err.into()),
                None => break,
            };
            if self.interrupt.swap(false, Ordering::Relaxed) {
                println!("Type \"quit\" if you really want to quit now");
            }

            let args = split_command(&line);
            let Some((cmd, rest)) = args.split_first() else {
                continue;
            };
            if let Err(err) = self.dispatch(cmd, rest) {
                println!("error: {err:#}");
            }
        }
        Ok(())
    }

    fn dispatch(&mut self, cmd: &str, args: &[String]) -> anyhow::Result<()> {
        match cmd {
            "quit" => self.cmd_quit(args),
            "help" => {
                println!("{}", help_text(args.first().map(String::as_str)));
                Ok(())
            }
            "pwd" => {
                println!("{}", self.cwd.dsid());
                Ok(())
            }
            "cd" => self.cmd_cd(args),
            "ls" => self.cmd_ls(args),
            "read" => self.cmd_read(args),
            "write" => self.cmd_write(args),
            "save" => self.cmd_save(args),
            "open" => self.cmd_open(args),
            "close" => self.cmd_close(args),
            "jobs" => self.cmd_jobs(),
            other => {
                println!("I don't understand \"{other}\". Type \"help\" if you need help.");
                Ok(())
            }
        }
    }

    fn cmd_quit(&mut self, args: &[String]) -> anyhow::Result<()> {
        let force = args.iter().any(|a| a == "-f");
        let modified = self.session.modified();
        if !force && !modified.is_empty() {
            println!("There are unsaved changes in:");
            for dsid in modified {
                println!("    {dsid}");
            }
            println!("Use \"save\" first, or \"quit -f\" to discard them.");
            return Ok(());
        }
        self.quit = true;
        Ok(())
    }

    fn cmd_cd(&mut self, args: &[String]) -> anyhow::Result<()> {
        let target = args.first().map(String::as_str).unwrap_or("/");
        let dsid = self.resolve(target)?;
        let next = self.session.open(&dsid, RefTag::label(CWD_TAG))?;
        let previous = std::mem::replace(&mut self.cwd, next);
        previous.release(&RefTag::label(CWD_TAG));
        Ok(())
    }

    fn cmd_ls(&mut self, args: &[String]) -> anyhow::Result<()> {
        let ds = match args.first() {
            Some(text) => {
                let dsid = self.resolve(text)?;
                self.session.open(&dsid, RefTag::label("<ls>"))?
            }
            None => {
                self.cwd.addref(RefTag::label("<ls>"))?;
                Arc::clone(&self.cwd)
            }
        };

        let result = (|| -> anyhow::Result<()> {
            for key in ds.enum_keys()? {
                match key? {
                    Key::Broken(warning) => println!("  ! {}", warning.description()),
                    key => println!("  {key}"),
                }
            }
            Ok(())
        })();
        ds.release(&RefTag::label("<ls>"));
        result
    }

    fn cmd_read(&mut self, args: &[String]) -> anyhow::Result<()> {
        let mut args: Vec<&str> = args.iter().map(String::as_str).collect();
        let background = args.last() == Some(&"&");
        if background {
            args.pop();
        }

        let mut range = ALL;
        if let Some(last) = args.last() {
            if let Ok(parsed) = self.parse_range(last) {
                range = parsed;
                args.pop();
            }
        }
        let dsid = match args.first() {
            Some(text) => self.resolve(text)?,
            None => self.cwd.dsid().clone(),
        };

        let ds = self.session.open(&dsid, RefTag::label("<read>"))?;
        let flag = Arc::clone(&self.interrupt);
        let label = format!("read {dsid}");
        let job = move || {
            let result = ds.read_bytes(range, &mut progress::cancellable(flag));
            ds.release(&RefTag::label("<read>"));
            result
        };

        let mut handle = self.pool.submit(label, job);
        if background {
            println!("[{}] running", self.background.len() + 1);
            self.background.push(handle);
            return Ok(());
        }

        while !handle.wait(Some(Duration::from_millis(200))) {
            // The interrupt flag reaches the job through its progress
            // callback; keep polling until it unwinds.
        }
        self.interrupt.store(false, Ordering::Relaxed);
        match handle.take_result() {
            Some(Ok(bytes)) => {
                let stdout = std::io::stdout();
                hex_dump(&bytes, &mut stdout.lock())?;
                Ok(())
            }
            Some(Err(EditError::Cancelled)) => {
                println!("(cancelled)");
                Ok(())
            }
            Some(Err(err)) => Err(err.into()),
            None => Err(anyhow!("worker died without reporting")),
        }
    }

    fn cmd_write(&mut self, args: &[String]) -> anyhow::Result<()> {
        let [target, range_text, data] = args else {
            return Err(anyhow!("usage: write <dsid> <range> <data>"));
        };
        let range = self.parse_range(range_text)?;
        let payload = if let Some(hex) = data.strip_prefix("0x") {
            decode_hex(hex)?
        } else {
            data.as_bytes().to_vec()
        };

        let dsid = self.resolve(target)?;
        let ds = self.session.open(&dsid, RefTag::label("<write>"))?;
        let result = ds.write_bytes(range, &payload, &RefTag::label("<shell>"));
        ds.release(&RefTag::label("<write>"));
        result?;
        println!("{} bytes spliced into {}", payload.len(), range);
        Ok(())
    }

    fn cmd_save(&mut self, args: &[String]) -> anyhow::Result<()> {
        let targets = match args.first() {
            Some(text) => vec![self.resolve(text)?],
            None => self.session.modified(),
        };
        if targets.is_empty() {
            println!("nothing to save");
            return Ok(());
        }
        for dsid in targets {
            let ds = self.session.open(&dsid, RefTag::label("<save>"))?;
            let result = ds.commit();
            ds.release(&RefTag::label("<save>"));
            result?;
            println!("saved {dsid}");
        }
        Ok(())
    }

    fn cmd_open(&mut self, args: &[String]) -> anyhow::Result<()> {
        let [name, target] = args else {
            return Err(anyhow!("usage: open <name> <dsid>"));
        };
        if self.named.contains_key(name) {
            return Err(anyhow!("\"{name}\" is already open; close it first"));
        }
        let dsid = self.resolve(target)?;
        let ds = self
            .session
            .open(&dsid, RefTag::label(format!("<open:{name}>")))?;
        println!("{name} -> {}", ds.dsid());
        self.named.insert(name.clone(), ds);
        Ok(())
    }

    fn cmd_close(&mut self, args: &[String]) -> anyhow::Result<()> {
        let [name] = args else {
            return Err(anyhow!("usage: close <name>"));
        };
        match self.named.remove(name) {
            Some(ds) => {
                ds.release(&RefTag::label(format!("<open:{name}>")));
                Ok(())
            }
            None => Err(anyhow!("nothing open under \"{name}\"")),
        }
    }

    fn cmd_jobs(&mut self) -> anyhow::Result<()> {
        if self.background.is_empty() {
            println!("no background jobs");
            return Ok(());
        }
        let mut finished: Vec<usize> = Vec::new();
        for (index, handle) in self.background.iter_mut().enumerate() {
            if handle.is_finished() {
                match handle.take_result() {
                    Some(Ok(bytes)) => {
                        println!("[{}] {} finished: {} bytes", index + 1, handle.label(), bytes.len())
                    }
                    Some(Err(err)) => {
                        println!("[{}] {} failed: {err}", index + 1, handle.label())
                    }
                    None => println!("[{}] {} died", index + 1, handle.label()),
                }
                finished.push(index);
            } else {
                println!("[{}] {} running", index + 1, handle.label());
            }
        }
        for index in finished.into_iter().rev() {
            self.background.remove(index);
        }
        Ok(())
    }
}

fn decode_hex(text: &str) -> anyhow::Result<Vec<u8>> {
    if text.len() % 2 != 0 {
        return Err(anyhow!("hex data needs an even number of digits"));
    }
    (0..text.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(&text[i..i + 2], 16).map_err(Into::into))
        .collect()
}

fn main() -> anyhow::Result<()> {
    let args: Vec<String> = std::env::args().collect();

    if args.iter().any(|a| a == "--version" || a == "-V") {
        println!("bytetree {}", env!("CARGO_PKG_VERSION"));
        return Ok(());
    }
    if args.iter().any(|a| a == "--help" || a == "-h") {
        println!("bytetree {}", env!("CARGO_PKG_VERSION"));
        println!();
        println!("Interactive low-level editor");
        println!();
        println!("Usage: bytetree [start-dsid]");
        println!();
        println!("Arguments:");
        println!("  [start-dsid]   Object to start in (default: the working directory)");
        println!();
        println!("Flags:");
        println!("  -V, --version  Print version information");
        println!("  -h, --help     Print this help message");
        return Ok(());
    }

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let start = args.get(1).map(String::as_str);
    Shell::new(start)?.run()
}

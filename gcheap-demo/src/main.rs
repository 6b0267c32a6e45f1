use std::env;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use gcheap::{Allocator, Collector, Config, Root};
use parking_lot::Mutex;

struct Pair {
    i: i32,
    d: f64,
}

impl Pair {
    fn new(i: i32, d: f64) -> Self {
        println!("Pair::new({i}, {d})");
        Self { i, d }
    }
}

impl Drop for Pair {
    fn drop(&mut self) {
        println!("drop {self}");
    }
}

impl fmt::Display for Pair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Pair {{ i: {}, d: {} }}", self.i, self.d)
    }
}

struct Composite {
    first: Mutex<Root<Pair>>,
    second: Mutex<Root<Pair>>,
    i: i32,
    d: f64,
}

impl Drop for Composite {
    fn drop(&mut self) {
        println!(
            "drop Composite {{ {}, {}, {}, {} }}",
            self.first.lock(), self.second.lock(), self.i, self.d,
        );
    }
}

fn single_objects(allocator: &Allocator) -> gcheap::Result<()> {
    let mut tp = allocator.manage(Pair::new(1, 2.0))?;
    println!("{}", tp);
    tp = allocator.manage(Pair::new(2, 1.1))?;
    println!("{}", tp);
    Ok(())
}

fn composite(allocator: &Allocator) -> gcheap::Result<()> {
    let tp2 = allocator.manage(Composite {
        first: Mutex::new(Root::null()),
        second: Mutex::new(Root::null()),
        i: 2,
        d: 2.5,
    })?;
    *tp2.first.lock() = allocator.manage(Pair::new(1, 1.24))?;
    *tp2.second.lock() = allocator.manage(Pair::new(4, 4.24))?;
    Ok(())
}

fn load_config(path: &str) -> Result<Config, String> {
    let data = std::fs::read_to_string(path).map_err(|err| format!("{path}: {err}"))?;
    Config::from_json(&data).map_err(|err| format!("{path}: {err}"))
}

fn run(config: Config) -> gcheap::Result<()> {
    let allocator = Arc::new(Allocator::with_config(config));
    let collector = Collector::spawn(allocator.clone(), Duration::from_millis(10))?;

    single_objects(&allocator)?;
    composite(&allocator)?;

    std::thread::sleep(Duration::from_secs(1));
    collector.stop()?;

    let stats = allocator.stats();
    println!("{}", serde_json::to_string_pretty(&stats).unwrap_or_else(|_| format!("{:?}", stats)));

    Ok(())
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args: Vec<String> = env::args().skip(1).collect();
    if args.len() > 1 {
        eprintln!("Usage: gcheap-demo [config.json]");
        return;
    }

    let config = match args.first() {
        Some(path) => match load_config(path) {
            Ok(config) => config,
            Err(msg) => {
                eprintln!("Error: {msg}");
                return;
            },
        },
        None => Config::default(),
    };

    if let Err(err) = run(config) {
        log::error!("{}", err);
    }
}

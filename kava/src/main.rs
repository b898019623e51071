#[macro_use]
extern crate log;

mod args;

use std::process::exit;

use kava_vm::{Engine, EngineOptions};

use crate::args::{LaunchOptions, Target};

fn main() {
    pretty_env_logger::init();

    let argv: Vec<String> = std::env::args().skip(1).collect();
    if argv.is_empty() {
        println!("{}", args::USAGE);
        exit(0);
    }

    let launch = match args::parse(argv) {
        Ok(launch) => launch,
        Err(message) => {
            eprintln!("{}", message);
            exit(1);
        }
    };

    exit(run(launch));
}

fn run(launch: LaunchOptions) -> i32 {
    let mut options = EngineOptions::default();
    if let Some(max_heap) = launch.max_heap {
        options.max_heap = max_heap;
    }
    if let Some(stack_size) = launch.stack_size {
        options.stack_size = stack_size;
    }
    if let Some(interval) = launch.gc_interval {
        options.gc_interval = interval;
    }
    for entry in &launch.class_path {
        options.class_path.push(entry.clone());
    }

    let class_name = match launch.target {
        Some(Target::Class(name)) => name.replace('.', "/"),
        Some(Target::Jar(_)) => {
            eprintln!("Jar loading is not yet implemented");
            return 1;
        }
        None => {
            eprintln!("No class or jar was provided");
            return 1;
        }
    };

    info!(
        "starting engine: heap {} bytes, stack {} bytes, gc every {:?}",
        options.max_heap, options.stack_size, options.gc_interval
    );

    let engine = match Engine::new(options) {
        Ok(engine) => engine,
        Err(e) => {
            eprintln!("{}", e);
            return 1;
        }
    };

    match engine.run_main(&class_name, &launch.program_args) {
        Ok(status) => status,
        Err(e) => {
            eprintln!("{}", e);
            1
        }
    }
}

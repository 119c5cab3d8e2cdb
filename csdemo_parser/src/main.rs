use std::collections::BTreeMap;
use std::io::BufReader;
use std::{env, fs::File, process};

use csdemo_events::EventCollector;
use csdemo_parser::{DemoParser, Result};

fn main() -> Result<()> {
    env_logger::init();

    let path = match env::args().nth(1) {
        Some(path) => path,
        None => {
            eprintln!("usage: csdemo <demo.dem>");
            process::exit(2);
        }
    };

    let file = File::open(&path)?;
    let parser = DemoParser::new(BufReader::new(file), EventCollector::new())?;
    let header = parser.header();
    println!(
        "{}: {:?} on {:?}, {} ticks over {:.1}s",
        path, header.map_name, header.server_name, header.playback_ticks, header.playback_time
    );

    let outcome = parser.parse_to_end()?;

    let mut counts: BTreeMap<&str, usize> = BTreeMap::new();
    for event in &outcome.sink.events {
        *counts.entry(event.event.kind_name()).or_default() += 1;
    }
    for (kind, count) in &counts {
        println!("{kind:>32}  {count}");
    }
    println!(
        "{} events total, {} players seen",
        outcome.sink.events.len(),
        outcome.state.players.len()
    );
    Ok(())
}

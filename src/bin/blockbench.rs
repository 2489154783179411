//! `blockbench`: a small CLI harness that exercises the block engine and
//! external sort end to end, in lieu of a real query executor driving them.
//!
//! Grounded in `nanodb`'s own `bin.rs` + `fern`/`log` setup: a hand-rolled
//! argv parser (no flag-parsing crate) and a `fern` dispatcher installed at
//! startup. Flags: `-h` (help), `-n N` (number of blocks to generate),
//! `-v BYTES` (variable-length payload width), `-i BYTES` (inline padding
//! width, via an extra fixed-width `Char` column).

use std::process;
use std::rc::Rc;
use std::sync::Arc;

use log::info;

use blocktable::block::BLOCK_SIZE;
use blocktable::cache::memory::InMemoryBlockCache;
use blocktable::cache::BlockCache;
use blocktable::schema::{ColumnInfo, ColumnType, Schema};
use blocktable::sort::{external_sort, Comparator};
use blocktable::value::{TupleLiteral, Value};
use blocktable::Block;

struct Config {
    num_blocks: usize,
    varchar_width: u32,
    inline_padding: u16,
}

impl Default for Config {
    fn default() -> Config {
        Config {
            num_blocks: 4,
            varchar_width: 32,
            inline_padding: 0,
        }
    }
}

fn print_usage() {
    println!("blockbench: exercise the block engine's sort/merge path");
    println!();
    println!("USAGE:");
    println!("    blockbench [-n N] [-v BYTES] [-i BYTES]");
    println!();
    println!("OPTIONS:");
    println!("    -h          print this help and exit");
    println!("    -n N        number of blocks to fill with random tuples (default 4)");
    println!("    -v BYTES    max width of the variable-length payload column (default 32)");
    println!("    -i BYTES    width of an extra fixed-width inline padding column (default 0)");
}

fn parse_args(args: &[String]) -> Result<Config, String> {
    let mut config = Config::default();
    let mut i = 0;
    while i < args.len() {
        match args[i].as_str() {
            "-h" => {
                print_usage();
                process::exit(0);
            }
            "-n" => {
                i += 1;
                let v = args.get(i).ok_or("-n requires an argument")?;
                config.num_blocks = v.parse().map_err(|_| format!("invalid -n value: {}", v))?;
            }
            "-v" => {
                i += 1;
                let v = args.get(i).ok_or("-v requires an argument")?;
                config.varchar_width = v.parse().map_err(|_| format!("invalid -v value: {}", v))?;
            }
            "-i" => {
                i += 1;
                let v = args.get(i).ok_or("-i requires an argument")?;
                config.inline_padding = v.parse().map_err(|_| format!("invalid -i value: {}", v))?;
            }
            other => return Err(format!("unrecognized argument: {}", other)),
        }
        i += 1;
    }
    Ok(config)
}

fn install_logger() {
    fern::Dispatch::new()
        .format(|out, message, record| {
            out.finish(format_args!("[{}][{}] {}", record.target(), record.level(), message))
        })
        .level(log::LevelFilter::Trace)
        .chain(std::io::stdout())
        .apply()
        .expect("failed to initialize logger");
}

fn build_schema(config: &Config) -> Arc<Schema> {
    let mut columns = vec![ColumnInfo::new("key", ColumnType::Integer)];
    if config.inline_padding > 0 {
        columns.push(ColumnInfo::new(
            "padding",
            ColumnType::Char {
                length: config.inline_padding,
            },
        ));
    }
    columns.push(ColumnInfo::new(
        "payload",
        ColumnType::VarChar {
            max_length: config.varchar_width,
        },
    ));
    Arc::new(Schema::new(columns))
}

/// A small deterministic linear-congruential generator, so a benchmark run
/// is reproducible without pulling in a `rand` dependency for what amounts
/// to filler data.
struct Lcg(u64);

impl Lcg {
    fn next_u32(&mut self) -> u32 {
        self.0 = self.0.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
        (self.0 >> 32) as u32
    }
}

fn fill_blocks<C: BlockCache>(
    cache: &mut C,
    schema: &Arc<Schema>,
    config: &Config,
) -> Vec<blocktable::BlockId> {
    let mut rng = Lcg(0xDEAD_BEEF);
    let mut ids = Vec::with_capacity(config.num_blocks);
    for _ in 0..config.num_blocks {
        let mut block = cache.new_block(schema.clone());
        loop {
            let key = rng.next_u32() as i32;
            let mut tuple = TupleLiteral::new();
            tuple.push(Value::Integer(key));
            if config.inline_padding > 0 {
                tuple.push(Value::Str("x".repeat(config.inline_padding as usize)));
            }
            let payload_len = (rng.next_u32() as usize) % (config.varchar_width as usize + 1);
            tuple.push(Value::Str("y".repeat(payload_len)));
            if !block.insert(&tuple).expect("schema-matched insert cannot fail") {
                break;
            }
        }
        info!("filled block {} with {} tuples", block.id(), block.active_tuple_count());
        ids.push(block.id());
        cache.unpin(block).expect("unpin cannot fail on a freshly filled block");
    }
    ids
}

fn key_comparator() -> Rc<Comparator> {
    Rc::new(|a: &Block, ai: u32, b: &Block, bi: u32| {
        let av = match a.value_at(ai, 0) {
            Value::Integer(v) => v,
            _ => unreachable!("key column is always Integer"),
        };
        let bv = match b.value_at(bi, 0) {
            Value::Integer(v) => v,
            _ => unreachable!("key column is always Integer"),
        };
        av.cmp(&bv)
    })
}

fn verify_sorted<C: BlockCache>(cache: &mut C, output_ids: &[blocktable::BlockId]) -> bool {
    let mut previous: Option<i32> = None;
    for &id in output_ids {
        let block = cache.fetch(id).expect("output block must still be resident or persisted");
        for i in 0..block.active_tuple_count() {
            let key = match block.value_at(i, 0) {
                Value::Integer(v) => v,
                _ => unreachable!("key column is always Integer"),
            };
            if let Some(prev) = previous {
                if key < prev {
                    return false;
                }
            }
            previous = Some(key);
        }
        cache.unpin(block).expect("unpin cannot fail on a freshly fetched block");
    }
    true
}

fn main() {
    install_logger();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let config = match parse_args(&args) {
        Ok(c) => c,
        Err(msg) => {
            eprintln!("blockbench: {}", msg);
            print_usage();
            process::exit(2);
        }
    };

    info!(
        "blockbench: {} blocks, {} byte block size, {} byte varchar, {} byte padding",
        config.num_blocks, BLOCK_SIZE, config.varchar_width, config.inline_padding
    );

    let schema = build_schema(&config);
    let mut cache = InMemoryBlockCache::new(config.num_blocks.max(1));

    let input_ids = fill_blocks(&mut cache, &schema, &config);
    let output_ids = match external_sort(&mut cache, schema.clone(), &input_ids, key_comparator()) {
        Ok(ids) => ids,
        Err(e) => {
            eprintln!("blockbench: sort failed: {}", e);
            process::exit(1);
        }
    };

    if verify_sorted(&mut cache, &output_ids) {
        info!("sort produced {} output blocks, verified in order", output_ids.len());
        process::exit(0);
    } else {
        eprintln!("blockbench: output blocks are not globally sorted");
        process::exit(1);
    }
}

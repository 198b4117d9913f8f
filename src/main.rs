//! uspgen - texture sample code generator
//!
//! Reads a shader description, runs the format and chunk scheduling passes
//! and prints the generated code of every sample.

use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use usp_core::{logging, Config};
use usp_hw::MoeState;
use usp_sample::{InputKind, InstBlockManager, InstStream, Shader, ShaderDesc, UspContext};

/// Instructions one sample block may hold
const BLOCK_CAPACITY: usize = 256;

#[derive(Parser, Debug)]
#[command(
    name = "uspgen",
    about = "Generate the texture sample code of an SGX shader description."
)]
struct Args {
    /// Shader description (TOML)
    shader: PathBuf,

    /// Configuration file (defaults to the user config directory)
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,
}

fn print_sample(shader: &Shader, stream: &InstStream, id: usize) -> anyhow::Result<()> {
    let sample = shader.sample(id)?;
    let block = stream
        .block(sample.block)
        .context("sample block disappeared")?;
    println!(
        "sample {} (texture {}, {} -> {}):",
        id,
        sample.desc.texture,
        format!("{:?}", shader.textures[sample.desc.texture].format).to_lowercase(),
        sample.desc.dest_fmt.name()
    );
    for (inst, encoded) in sample.all_insts().zip(block.insts.iter()) {
        println!("    {:016x}  {}", encoded.hw.as_u64(), inst);
    }
    Ok(())
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let config = match &args.config {
        Some(path) => Config::load_from(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => Config::load()?,
    };
    logging::init(config.debug.log_level);

    let ctx = UspContext::new(config);
    let desc = ShaderDesc::load(&args.shader)
        .with_context(|| format!("loading shader {}", args.shader.display()))?;
    tracing::info!(
        "{}: {} textures, {} samples",
        args.shader.display(),
        desc.textures.len(),
        desc.samples.len()
    );

    let mut shader = Shader::from_desc(&ctx, desc)?;
    let mut stream = InstStream::new();
    for id in 0..shader.samples.len() {
        let block = stream.add_block(BLOCK_CAPACITY, MoeState::default())?;
        shader.set_blocks(id, block, block)?;
    }
    let schedule = shader.compile(&ctx, &mut stream)?;

    println!(
        "target {}: schedule {:?}, {}/{} iterator slots, {}/{} PA registers, {} temps",
        ctx.config.target.core.name(),
        schedule.phase,
        schedule.slots_used,
        ctx.target.max_iterators,
        schedule.pa_used,
        ctx.pa_budget(),
        shader.max_temps
    );
    for entry in shader.input_data.entries() {
        let what = match entry.kind {
            InputKind::Attribute(i) => format!("attribute {}", i),
            InputKind::Coord(coord) => format!("coordinates {:?}", coord),
            InputKind::Chunk { sample, chunk } => format!("sample {} chunk {}", sample, chunk),
        };
        println!(
            "  pa{}..{}{} {}",
            entry.pa,
            entry.pa + entry.regs,
            if entry.shared { " (shared)" } else { "" },
            what
        );
    }
    if ctx.config.debug.dump_instructions {
        for (i, entry) in shader.tex_ctrl_words.iter().enumerate() {
            println!("  state {}: {:08x?}", i, entry.used_words(&ctx));
        }
    }

    for id in 0..shader.samples.len() {
        print_sample(&shader, &stream, id)?;
    }
    if let Some(last) = shader.samples.last() {
        tracing::debug!("MOE after last sample: {:?}", stream.moe_state(last.block));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_args() {
        Args::command().debug_assert();

        let args = Args::try_parse_from(["uspgen", "demos/basic.toml", "-c", "demos/config.toml"]).unwrap();
        assert_eq!(args.shader, PathBuf::from("demos/basic.toml"));
        assert_eq!(args.config, Some(PathBuf::from("demos/config.toml")));

        assert!(Args::try_parse_from(["uspgen"]).is_err());
        assert!(Args::try_parse_from(["uspgen", "a.toml", "b.toml"]).is_err());
    }
}

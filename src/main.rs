mod app;

use std::env;
use std::path::PathBuf;

use anyhow::{bail, Context, Result};

const WIDTH: u32  = 800;
const HEIGHT: u32 = 800;

/// Value following a flag.
fn flag_value<'a>(args: &'a [String], i: usize) -> Result<&'a str> {
    return args
        .get(i + 1)
        .map(|value| value.as_str())
        .with_context(|| format!("missing value after {}", args[i]));
}

fn parse_args(args: &[String]) -> Result<app::Params> {
    // Default values.
    let mut params = app::Params {
        width: WIDTH,
        height: HEIGHT,
        asset_path: String::from("assets/diablo"),
        pipeline: app::Pipeline::Phong,
        output: None,
    };

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "-p" => params.asset_path = flag_value(args, i)?.to_string(),
            "-s" => params.pipeline = flag_value(args, i)?.parse()?,
            "-o" => params.output = Some(PathBuf::from(flag_value(args, i)?)),
            "-w" => {
                params.width = flag_value(args, i)?.parse().context("width must be a number")?;
            }
            "-h" => {
                params.height = flag_value(args, i)?.parse().context("height must be a number")?;
            }
            other => bail!("unknown argument {other}"),
        }
        i += 2;
    }
    if params.width == 0 || params.height == 0 {
        bail!("frame size must be positive, got {}x{}", params.width, params.height);
    }

    return Ok(params);
}

#[show_image::main]
fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args: Vec<String> = env::args().collect();
    let params = parse_args(&args)?;
    app::run(params)?;

    return Ok(());
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(values: &[&str]) -> Vec<String> {
        return std::iter::once("tiny_gl").chain(values.iter().copied()).map(String::from).collect();
    }

    #[test]
    fn test_defaults() {
        let params = parse_args(&args(&[])).unwrap();
        assert_eq!(params.width, WIDTH);
        assert_eq!(params.pipeline, app::Pipeline::Phong);
        assert!(params.output.is_none());
    }

    #[test]
    fn test_flags() {
        let flags = ["-s", "shadow", "-o", "out.png", "-w", "320", "-p", "assets/head"];
        let params = parse_args(&args(&flags)).unwrap();
        assert_eq!(params.pipeline, app::Pipeline::Shadow);
        assert_eq!(params.output, Some(PathBuf::from("out.png")));
        assert_eq!(params.width, 320);
        assert_eq!(params.asset_path, "assets/head");
    }

    #[test]
    fn test_bad_arguments() {
        assert!(parse_args(&args(&["-s", "raytraced"])).is_err());
        assert!(parse_args(&args(&["-s"])).is_err());
        assert!(parse_args(&args(&["--fast"])).is_err());
        assert!(parse_args(&args(&["-w", "0"])).is_err());
    }
}

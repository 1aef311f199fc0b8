use std::env;
use std::process;

use mzimage::prelude::*;
use mzimage::{write_image, ExportOptions, ImageRaster, SpectrumImage, Tolerance};

fn usage() -> ! {
    eprintln!("usage: mzimage <command> <file.imzML> [...]");
    eprintln!();
    eprintln!("commands:");
    eprintln!("  summary  <file.imzML>                  print the dataset layout");
    eprintln!("  image    <file.imzML> <mz> [tol]       print an ion image as CSV");
    eprintln!("  validate <file.imzML>                  verify the binary checksum");
    eprintln!("  convert  <file.imzML> <out.imzML>      rewrite as a continuous pair");
    process::exit(2);
}

fn summary(path: &str) -> Result<(), EngineError> {
    let image = SpectrumImage::load(path)?;
    let dims = image.dims();
    let spacing = image.spacing();
    println!("format:     {}", image.format());
    println!("pixels:     {} x {} x {}", dims[0], dims[1], dims[2]);
    println!(
        "pixel size: {} x {} mm",
        spacing[0], spacing[1]
    );
    println!("spectra:    {}", image.spectrum_count());
    println!(
        "values:     m/z {}, intensity {}",
        image.mass_value_type(),
        image.intensity_value_type()
    );
    let axis = image.mass_axis();
    if let (Some(first), Some(last)) = (axis.first(), axis.last()) {
        println!("mass range: {first} - {last} ({} positions)", axis.len());
    }
    Ok(())
}

fn ion_image(path: &str, center: &str, tolerance: Option<&str>) -> Result<(), EngineError> {
    let center: f64 = center
        .parse()
        .map_err(|_| EngineError::configuration(format!("not a mass value: {center}")))?;
    let mut image = SpectrumImage::load(path)?;
    let tolerance = match tolerance {
        Some(raw) => raw
            .parse::<Tolerance>()
            .map_err(|e| EngineError::configuration(format!("bad tolerance {raw}: {e}")))?,
        None => image.config().tolerance,
    };
    let mut target = ImageRaster::with_geometry(image.dims(), image.spacing(), image.origin());
    image.get_image(center, tolerance, &mut target)?;
    let [width, height, _] = image.dims();
    for y in 0..height {
        let row: Vec<String> = (0..width)
            .map(|x| target.get(x, y, 0).to_string())
            .collect();
        println!("{}", row.join(","));
    }
    Ok(())
}

fn validate(path: &str) -> Result<(), EngineError> {
    let image = SpectrumImage::load(path)?;
    if image.validate_checksum()? {
        println!("checksum ok");
    } else {
        println!("checksum mismatch");
        process::exit(1);
    }
    Ok(())
}

fn convert(path: &str, out: &str) -> Result<(), EngineError> {
    let mut image = SpectrumImage::load(path)?;
    write_image(&mut image, out, &ExportOptions::default())?;
    println!("wrote {out}");
    Ok(())
}

fn main() {
    env_logger::init();
    let args: Vec<String> = env::args().collect();
    if args.len() < 3 {
        usage();
    }
    let result = match args[1].as_str() {
        "summary" => summary(&args[2]),
        "image" => {
            if args.len() < 4 {
                usage();
            }
            ion_image(&args[2], &args[3], args.get(4).map(String::as_str))
        }
        "validate" => validate(&args[2]),
        "convert" => {
            if args.len() < 4 {
                usage();
            }
            convert(&args[2], &args[3])
        }
        _ => usage(),
    };
    if let Err(err) = result {
        eprintln!("error: {err}");
        process::exit(1);
    }
}

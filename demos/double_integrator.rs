use std::path::PathBuf;

use clap::Parser;
use log::info;
use nalgebra::{DMatrix, DVector};

use cis_rs::canonical::CanonicalForm;
use cis_rs::generator::CisGenerator;
use cis_rs::polyhedron::HPolyhedron;

#[derive(Parser, Debug)]
#[command(about = "Controlled invariant set of a double integrator")]
struct Args {
    /// Level (L) of the move buffer
    #[arg(short, long, default_value_t = 1)]
    level: usize,

    /// Transient (T) of the move buffer
    #[arg(short, long, default_value_t = 0)]
    transient: usize,

    /// Bound on |position| and |velocity|
    #[arg(short, long, default_value_t = 5.0)]
    bound: f64,

    /// Bound on |w| for a disturbance entering the velocity (0 = no disturbance)
    #[arg(short, long, default_value_t = 0.0)]
    disturbance: f64,

    /// Write the resulting set in cdd .ine format to this file
    #[arg(long)]
    ine: Option<PathBuf>,
}

fn main() -> color_eyre::Result<()> {
    color_eyre::install()?;

    simplelog::TermLogger::init(
        simplelog::LevelFilter::Debug,
        simplelog::Config::default(),
        simplelog::TerminalMode::Mixed,
        simplelog::ColorChoice::Auto,
    )?;

    let args = Args::parse();
    info!("args = {:?}", args);

    let a = DMatrix::from_row_slice(2, 2, &[1.0, 1.0, 0.0, 1.0]);
    let b = DMatrix::from_row_slice(2, 1, &[0.0, 1.0]);

    let mut generator = if args.disturbance > 0.0 {
        let e = DMatrix::from_row_slice(2, 1, &[0.0, 1.0]);
        let mut generator = CisGenerator::with_disturbance(a, b, e)?;
        generator.set_disturbance_region(HPolyhedron::symmetric_box(&[args.disturbance])?)?;
        generator
    } else {
        CisGenerator::new(a, b)?
    };

    let bf = generator.canonical_form();
    println!("controllability indices = {:?}", bf.controllability_indices());
    println!("T = {}", bf.transform());

    let safe = HPolyhedron::symmetric_box(&[args.bound, args.bound])?;
    let cis = generator.compute_cis(&safe, args.level, args.transient)?;
    println!("{}", cis);

    let origin = DVector::zeros(cis.dim());
    println!("origin inside: {}", cis.contains(&origin));

    if let Some(path) = &args.ine {
        std::fs::write(path, cis.to_ine())?;
        println!("written to {}", path.display());
    }

    Ok(())
}

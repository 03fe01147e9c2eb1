use std::fs::File;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, ValueEnum};
use ndarray::{Array1, Array2};
use ndarray_npy::{write_npy, NpzReader};

use recon_optim::algorithms::{Cgls, GradientDescent, LogCallback, Pdhg, ProximalGradient, Sirt};
use recon_optim::functions::{BlockFunction, IndicatorBox, L2NormSquared, LeastSquares, MixedL21Norm, TotalVariation, TvOptions};
use recon_optim::operators::{BlockOperator, GradientOperator, MatrixOperator};
use recon_optim::{Algorithm, AxisLabel, DataArray, Geometry, Objective, Operator, Solution, Solver, SolverOptions};

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum Method {
    /// Conjugate gradient least squares
    Cgls,
    /// Simultaneous iterative reconstruction, non-negative
    Sirt,
    /// Gradient descent on least squares plus alpha ||x||^2
    Gd,
    /// FISTA on least squares plus alpha TV(x)
    Fista,
    /// PDHG on least squares plus alpha TV(x), non-negative
    PdhgTv,
}

/// Iterative reconstruction CLI for RBYRCT.
///
/// Expected NPZ file structure:
///   - key "projections": 1D array (M,) of f64
///   - key "system_matrix": 2D array (M, N) of f64
///
/// The geometry JSON describes the reconstructed volume, e.g.
/// `{"axes": [{"label": "horizontal_y", "len": 8}, {"label": "horizontal_x", "len": 8}]}`,
/// and its size must equal N.
#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Path to NPZ file containing projections and system_matrix
    #[arg(long)]
    projections: PathBuf,

    /// Path to geometry JSON of the volume
    #[arg(long)]
    geometry: PathBuf,

    #[arg(long, value_enum, default_value_t = Method::Cgls)]
    algorithm: Method,

    /// Solver options JSON; --iterations and --tolerance override it
    #[arg(long)]
    config: Option<PathBuf>,

    /// Maximum number of iterations
    #[arg(long)]
    iterations: Option<usize>,

    /// Stopping tolerance (residual for cgls, objective change otherwise)
    #[arg(long)]
    tolerance: Option<f64>,

    /// Regularisation weight
    #[arg(long, default_value_t = 0.01)]
    alpha: f64,

    /// Print a progress line every this many iterations
    #[arg(long, default_value_t = 10)]
    log_every: usize,

    /// Output path for reconstructed volume (.npy)
    #[arg(long)]
    output: PathBuf,

    /// Optional output path for the convergence log (.json)
    #[arg(long)]
    log: Option<PathBuf>,
}

fn load_options(args: &Args) -> Result<SolverOptions> {
    let mut options = match &args.config {
        Some(path) => {
            let file = File::open(path).map_err(|e| anyhow::anyhow!("Failed to open config {:?}: {}", path, e))?;
            serde_json::from_reader(file).map_err(|e| anyhow::anyhow!("Invalid solver config {:?}: {}", path, e))?
        }
        None => SolverOptions::default(),
    };
    if let Some(n) = args.iterations {
        options.max_iterations = n;
    }
    if let Some(tol) = args.tolerance {
        options.tolerance = tol;
    }
    options.validate()?;
    Ok(options)
}

fn solve<A: Algorithm>(algorithm: A, options: SolverOptions, log_every: usize) -> Result<Solution> {
    let mut solver = Solver::new(algorithm, options)?.with_callback(LogCallback::new(log_every));
    Ok(solver.run()?)
}

fn reconstruct(
    method: Method,
    a: Arc<dyn Operator>,
    b: DataArray,
    options: SolverOptions,
    alpha: f64,
    log_every: usize,
) -> Result<Solution> {
    let domain = a.domain().clone();
    let x0 = DataArray::zeros(&domain);
    match method {
        Method::Cgls => solve(Cgls::new(a, b, x0, &options)?, options, log_every),
        Method::Sirt => solve(
            Sirt::new(a, b, x0, &options)?.with_bounds(0.0, f64::INFINITY)?,
            options,
            log_every,
        ),
        Method::Gd => {
            let mut objective = Objective::new(domain).smooth(Arc::new(LeastSquares::new(a, b)?))?;
            if alpha > 0.0 {
                objective = objective.smooth(Arc::new(L2NormSquared::new(alpha)?))?;
            }
            solve(GradientDescent::new(objective, x0, &options)?, options, log_every)
        }
        Method::Fista => {
            let options = SolverOptions {
                acceleration: true,
                ..options
            };
            let tv = TotalVariation::new(
                domain.clone(),
                alpha,
                TvOptions {
                    lower: Some(0.0),
                    ..TvOptions::default()
                },
            )?;
            let objective = Objective::new(domain)
                .smooth(Arc::new(LeastSquares::new(a, b)?))?
                .proximable(Arc::new(tv))?;
            solve(ProximalGradient::new(objective, x0, &options)?, options, log_every)
        }
        Method::PdhgTv => {
            let grad: Arc<dyn Operator> = Arc::new(GradientOperator::new(domain.clone())?);
            let k = BlockOperator::new(vec![a, grad])?;
            let f = BlockFunction::new(
                vec![
                    Arc::new(L2NormSquared::new(0.5)?.with_data(b)),
                    Arc::new(MixedL21Norm::new(alpha)?),
                ],
                k.layout().clone(),
            )?;
            let objective = Objective::new(domain)
                .dual(Arc::new(f), Arc::new(k))?
                .proximable(Arc::new(IndicatorBox::non_negative()))?;
            solve(Pdhg::new(objective, x0, &options)?, options, log_every)
        }
    }
}

fn main() -> Result<()> {
    env_logger::init();
    let args = Args::parse();

    // --- Load projections + system matrix from NPZ ---
    let file = File::open(&args.projections)
        .map_err(|e| anyhow::anyhow!("Failed to open NPZ {:?}: {}", args.projections, e))?;
    let mut npz = NpzReader::new(file)
        .map_err(|e| anyhow::anyhow!("Failed to read NPZ {:?}: {}", args.projections, e))?;

    let projections: Array1<f64> = npz
        .by_name("projections")
        .map_err(|e| anyhow::anyhow!("Missing or invalid 'projections' array in NPZ: {}", e))?;

    let system_matrix: Array2<f64> = npz
        .by_name("system_matrix")
        .map_err(|e| anyhow::anyhow!("Missing or invalid 'system_matrix' array in NPZ: {}", e))?;

    // --- Volume geometry ---
    let geom_file = File::open(&args.geometry)
        .map_err(|e| anyhow::anyhow!("Failed to open geometry JSON {:?}: {}", args.geometry, e))?;
    let domain: Geometry = serde_json::from_reader(geom_file)
        .map_err(|e| anyhow::anyhow!("Invalid geometry JSON {:?}: {}", args.geometry, e))?;
    let range = Geometry::vector(AxisLabel::Custom("ray".into()), projections.len())?;

    let options = load_options(&args)?;
    let (m, n) = system_matrix.dim();
    let a: Arc<dyn Operator> = Arc::new(MatrixOperator::new(system_matrix, domain, range.clone())?);
    let b = DataArray::from_vec(range, projections.to_vec())?;

    println!(
        "Running {:?} with M = {}, N = {}, max_iterations = {}, alpha = {}",
        args.algorithm, m, n, options.max_iterations, args.alpha
    );

    let solution = reconstruct(args.algorithm, a, b, options, args.alpha, args.log_every)?;

    if let Some(reason) = solution.log.stop_reason() {
        println!("Stopped: {}", reason);
    }
    if let Some(f) = solution.log.last_objective() {
        println!("Final objective: {:.6e}", f);
    }

    // --- Save volume as .npy ---
    write_npy(&args.output, solution.x.data())
        .map_err(|e| anyhow::anyhow!("Failed to write output NPY {:?}: {}", args.output, e))?;
    println!("Reconstruction written to {:?}", args.output);

    if let Some(path) = &args.log {
        let file = File::create(path).map_err(|e| anyhow::anyhow!("Failed to create log {:?}: {}", path, e))?;
        serde_json::to_writer_pretty(file, &solution.log)
            .map_err(|e| anyhow::anyhow!("Failed to write log {:?}: {}", path, e))?;
        println!("Convergence log written to {:?}", path);
    }

    Ok(())
}

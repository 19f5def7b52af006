//! Console driver: assembles 1D FEM matrices, seeds a random concentration
//! profile and alternates reaction and diffusion steps.

use nalgebra_sparse::{CooMatrix, CscMatrix};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use reaction_diffusion::{Real, Simulation};

/// Damping (mass) and stiffness matrices of 1D linear elements with natural
/// boundary conditions on a uniform mesh of `n` nodes.
fn fem_matrices_1d(n: usize, h: Real) -> (CscMatrix<Real>, CscMatrix<Real>) {
    let mut damping = CooMatrix::new(n, n);
    let mut stiffness = CooMatrix::new(n, n);
    for i in 0..n {
        let boundary = i == 0 || i == n - 1;
        damping.push(i, i, if boundary { h / 3.0 } else { 2.0 * h / 3.0 });
        stiffness.push(i, i, if boundary { 1.0 / h } else { 2.0 / h });
        if i + 1 < n {
            damping.push(i, i + 1, h / 6.0);
            damping.push(i + 1, i, h / 6.0);
            stiffness.push(i, i + 1, -1.0 / h);
            stiffness.push(i + 1, i, -1.0 / h);
        }
    }
    (CscMatrix::from(&damping), CscMatrix::from(&stiffness))
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    simplelog::TermLogger::init(
        simplelog::LevelFilter::Info,
        simplelog::Config::default(),
        simplelog::TerminalMode::Mixed,
        simplelog::ColorChoice::Auto,
    )?;

    let n = 64;
    let (damping, stiffness) = fem_matrices_1d(n, 1.0 / (n as Real - 1.0));

    let mut rng = StdRng::seed_from_u64(0xD1FF);
    let u0: Vec<Real> = (0..n).map(|_| rng.gen_range(0.0..1.0)).collect();

    let mut sim = Simulation::new(n);
    sim.epsilon = 1e-6;
    sim.add_species("u");
    sim.add_species("v");
    sim.set_species("u", &u0)?;
    sim.add_reaction("u -> v", 0.8)?;

    sim.load_dampness_matrix(damping)?;
    sim.load_stiffness_matrix(stiffness)?;

    println!("Start vector:");
    sim.print(5);

    let tau = 1e-2;
    for _ in 0..100 {
        sim.iterate_reaction(tau)?;
        sim.iterate_diffusion(tau)?;
    }
    sim.prune(0.0);

    println!("Final vector:");
    sim.print(5);

    Ok(())
}

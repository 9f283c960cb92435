use jetree::config::{LaplacianKind, StoppingCondition};
use jetree::{cluster, rand_score, ClusteringEngine, JetConfig, Kinematics, SpectralConfig, UpdatePolicy};
use rand::prelude::*;
use rand::rngs::StdRng;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let mut rng = StdRng::seed_from_u64(11);
    let mut inputs = Vec::new();
    for (axis_y, axis_phi) in [(0.0, 0.0), (1.2, 2.8), (-1.0, -1.5)] {
        for _ in 0..5 {
            let pt: f64 = rng.gen_range(1.0..30.0);
            let y: f64 = axis_y + rng.gen_range(-0.2..0.2);
            let phi: f64 = axis_phi + rng.gen_range(-0.2..0.2);
            inputs.push(Kinematics::from_collider(pt, y, phi, pt * y.cosh()));
        }
    }

    let reference = cluster(JetConfig::sequential(0.4, -1.0), &inputs)?;
    println!("anti-kt: {} jets", reference.len());

    for policy in [
        UpdatePolicy::Mean,
        UpdatePolicy::RowRecompute,
        UpdatePolicy::FullRebuild,
    ] {
        for laplacian in [LaplacianKind::Unnormalized, LaplacianKind::Symmetric] {
            let spectral = SpectralConfig::default()
                .with_update_policy(policy)
                .with_laplacian(laplacian)
                .with_stopping_condition(StoppingCondition::BeamParticle);
            let mut engine = ClusteringEngine::new(JetConfig::spectral(0.4, spectral), &inputs)?;
            engine.run()?;
            let jets = engine.split()?;
            let score = rand_score(&reference, &jets, inputs.len())?;
            println!(
                "{:>13} {:>13}: {:>2} jets, {} eigendecompositions, ARI vs anti-kt {score:.3}",
                policy.to_string(),
                laplacian.to_string(),
                jets.len(),
                engine.eigenvalues().len(),
            );
        }
    }
    Ok(())
}

use lowrank::{Config, ContinuousEstimator};
use rand::distributions::Distribution;
use rand::rngs::StdRng;
use rand::SeedableRng;
use statrs::distribution::Beta;

fn main() {
    let mut rng = StdRng::seed_from_u64(17);
    let horizontal = Beta::new(1.0, 2.0).unwrap();
    let vertical = Beta::new(2.0, 2.0).unwrap();
    let sample: Vec<(f64, f64)> = (0..4000)
        .map(|_| (horizontal.sample(&mut rng), vertical.sample(&mut rng)))
        .collect();

    let mut estimator = ContinuousEstimator::new(Config::default());
    estimator.fit(&sample).unwrap();

    let points: Vec<f64> = (0..10).map(|i| (i as f64 + 0.5) / 10.0).collect();
    let densities = estimator.pdf(&points, &points).unwrap();

    println!("estimated density over a 10x10 grid of the unit square:");
    print!("{:>7}", "");
    for &y in &points {
        print!("{:>7.2}", y);
    }
    println!();
    for (i, &x) in points.iter().enumerate() {
        print!("{:>7.2}", x);
        for j in 0..points.len() {
            print!("{:>7.3}", densities[(i, j)]);
        }
        println!();
    }
}

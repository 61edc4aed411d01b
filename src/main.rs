use csv_core::{ReadFieldResult, ReaderBuilder};
use lasso::{Rodeo, RodeoResolver};
use lowrank::{Config, DiscreteEstimator};
use std::io;
use std::str;

fn load_pairs<I: io::Read, K: lasso::Key + Default + Copy + Ord>(
    mut input: I,
) -> io::Result<(RodeoResolver<K>, Vec<(K, K)>)> {
    let mut inputbuf = [0; 16384];
    let mut fieldbuf = [0; 1024];
    let mut fieldlen = 0;
    let mut pending = None;
    let mut pairs = Vec::new();
    let mut rodeo = Rodeo::new();
    let mut tsv = ReaderBuilder::new().delimiter(b'\t').build();

    loop {
        let read = input.read(&mut inputbuf)?;
        let mut bytes = &inputbuf[..read];
        loop {
            let (result, nin, nout) = tsv.read_field(bytes, &mut fieldbuf[fieldlen..]);
            bytes = &bytes[nin..];
            fieldlen += nout;
            match result {
                ReadFieldResult::InputEmpty => break,
                ReadFieldResult::OutputFull => {
                    return Err(io::Error::new(
                        io::ErrorKind::InvalidData,
                        format!("label too long on line {}", tsv.line()),
                    ));
                }
                ReadFieldResult::Field { record_end } => {
                    let field = str::from_utf8(&fieldbuf[..fieldlen])
                        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
                    fieldlen = 0;

                    let key = rodeo.get_or_intern(field);
                    match (pending.take(), record_end) {
                        (None, false) => pending = Some(key),
                        (Some(first), true) => pairs.push((first, key)),
                        _ => {
                            return Err(io::Error::new(
                                io::ErrorKind::InvalidData,
                                format!("expected two fields per record on line {}", tsv.line()),
                            ));
                        }
                    }
                }
                ReadFieldResult::End => {
                    return Ok((rodeo.into_resolver(), pairs));
                }
            }
        }
    }
}

fn main() -> io::Result<()> {
    let alpha = std::env::args()
        .nth(1)
        .and_then(|arg| arg.parse().ok())
        .unwrap_or(0.1);
    let config = Config::new(alpha).map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;

    let (resolver, pairs) = load_pairs::<_, lasso::MiniSpur>(io::stdin().lock())?;

    let mut estimator = DiscreteEstimator::new(config);
    estimator
        .fit(&pairs)
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;

    // Just fitted, so the accessors cannot fail.
    let table = estimator.probability_matrix().unwrap();
    let row_labels = estimator.row_labels().unwrap();
    let col_labels = estimator.col_labels().unwrap();

    println!("observations: {}", pairs.len());
    println!("alpha: {}", alpha);
    println!("estimate: {:?}", estimator.estimate_kind().unwrap());
    println!();

    print!("{:>12}", "");
    for j in 0..col_labels.len() {
        print!("{:>12}", resolver.resolve(&col_labels.label(j)));
    }
    println!();
    for i in 0..row_labels.len() {
        print!("{:>12}", resolver.resolve(&row_labels.label(i)));
        for j in 0..col_labels.len() {
            print!("{:>12.6}", table[(i, j)]);
        }
        println!();
    }

    println!();
    println!("draws from the fitted table:");
    let mut rng = rand::thread_rng();
    for (a, b) in estimator.sample(10, &mut rng).unwrap() {
        println!("  {}\t{}", resolver.resolve(&a), resolver.resolve(&b));
    }

    Ok(())
}

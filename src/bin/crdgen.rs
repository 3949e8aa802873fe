use kube::CustomResourceExt;
use pg_snapshot_operator::crd::{Postgres, Snapshot};

fn main() -> anyhow::Result<()> {
    print!("{}", serde_yaml::to_string(&Snapshot::crd())?);
    println!("---");
    print!("{}", serde_yaml::to_string(&Postgres::crd())?);
    Ok(())
}

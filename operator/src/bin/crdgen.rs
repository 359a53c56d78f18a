use foo_operator::crd::Foo;
use kube::CustomResourceExt;

fn main() -> Result<(), serde_yaml::Error> {
    let crd = Foo::crd();
    print!("{}", serde_yaml::to_string(&crd)?);
    Ok(())
}

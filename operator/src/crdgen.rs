use kube::CustomResourceExt;

use ovn_operator::ovn_controller::OVNController;

fn main() -> Result<(), serde_yaml::Error> {
    print!("{}", serde_yaml::to_string(&OVNController::crd())?);
    Ok(())
}

use kube::CustomResourceExt;
use rabbitmq_topology_operator::crd::{
    Binding, Exchange, Federation, Permission, Policy, Queue, SchemaReplication, Shovel,
    SuperStream, User, Vhost,
};

fn main() -> Result<(), serde_yaml::Error> {
    let crds = [
        Queue::crd(),
        Exchange::crd(),
        Binding::crd(),
        Vhost::crd(),
        User::crd(),
        Permission::crd(),
        Policy::crd(),
        Shovel::crd(),
        Federation::crd(),
        SchemaReplication::crd(),
        SuperStream::crd(),
    ];
    for crd in &crds {
        print!("---\n{}", serde_yaml::to_string(crd)?);
    }
    Ok(())
}

use std::{
    fs::{create_dir_all, write},
    path::{Path, PathBuf},
};

use kube::CustomResourceExt;
use serde::Serialize;

const CRD_OUTPUT: &str = "../crd";

fn main() {
    let crd_output = Path::new(CRD_OUTPUT);

    println!("cargo:rerun-if-changed=../ippool-core/src/resources/crd");

    export_v1alpha2_crds(crd_output);
}

fn export_v1alpha2_crds(path: &Path) {
    use ippool_core::resources::crd::v1alpha2::ippool::IPPool;

    let version_path = path.join(Path::new("v1alpha2"));

    create_dir_all(&version_path).unwrap();
    write_serialized(&IPPool::crd(), &get_crd_path(&version_path, IPPool::crd_name()));
}

fn write_serialized<T: Sized + Serialize>(obj: &T, path: &Path) {
    write(path, serde_yaml::to_string(obj).unwrap()).unwrap();
}

fn get_crd_path(dir: &Path, name: &str) -> PathBuf {
    dir.join(Path::new(&format!("{name}.yaml")))
}

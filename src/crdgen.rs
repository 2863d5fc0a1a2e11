use controller::apis::dittoserver_types::DittoServer;
use kube::CustomResourceExt;
fn main() {
    let mut crd = DittoServer::crd();

    // Ensure metadata exists
    if crd.metadata.annotations.is_none() {
        crd.metadata.annotations = Some(Default::default());
    }

    // Add an annotation
    if let Some(annotations) = crd.metadata.annotations.as_mut() {
        annotations.insert("helm.sh/resource-policy".to_string(), "keep".to_string());
    }

    let crd_str = serde_yaml::to_string(&crd).unwrap();
    let prepend_string =
        "{{- if (index .Values \"controller\").enabled }}\n{{- if (index .Values \"controller\").crds.create }}\n";
    let append_string = "{{- end }}\n{{- end }}";
    print!("{}{}{}", prepend_string, crd_str, append_string)
}

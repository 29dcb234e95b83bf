//! Keyword classification of service names
//!
//! Matching is a case-insensitive substring test. Rules are evaluated in
//! order and the first match wins, so reordering a list changes results.

use crate::focus::spec::ServiceCategory;

/// Ordered (category, keywords) cascade
#[derive(Debug, Clone, Copy)]
pub struct CategoryRules {
    rules: &'static [(ServiceCategory, &'static [&'static str])],
}

impl CategoryRules {
    pub const fn new(rules: &'static [(ServiceCategory, &'static [&'static str])]) -> Self {
        Self { rules }
    }

    /// Category of `name`, `Other` when no keyword matches
    pub fn classify(&self, name: &str) -> ServiceCategory {
        let lower = name.to_lowercase();
        self.rules
            .iter()
            .find(|(_, keywords)| keywords.iter().any(|k| lower.contains(k)))
            .map(|(category, _)| *category)
            .unwrap_or(ServiceCategory::Other)
    }
}

/// Ordered (keywords, label) subcategory cascade
#[derive(Debug, Clone, Copy)]
pub struct SubcategoryRules {
    rules: &'static [(&'static [&'static str], &'static str)],
}

impl SubcategoryRules {
    pub const fn new(rules: &'static [(&'static [&'static str], &'static str)]) -> Self {
        Self { rules }
    }

    pub fn classify(&self, name: &str) -> Option<&'static str> {
        let lower = name.to_lowercase();
        self.rules
            .iter()
            .find(|(keywords, _)| keywords.iter().any(|k| lower.contains(k)))
            .map(|(_, label)| *label)
    }
}

use ServiceCategory::*;

pub const AWS_CATEGORIES: CategoryRules = CategoryRules::new(&[
    (
        AiAndMachineLearning,
        &[
            "sagemaker", "rekognition", "comprehend", "polly", "transcribe", "translate",
            "textract", "personalize", "forecast", "lex", "kendra", "augmented ai", "deepracer",
            "machine learning",
        ],
    ),
    (
        Analytics,
        &[
            "athena", "emr", "kinesis", "glue", "quicksight", "elasticsearch", "opensearch",
            "msk", "data pipeline", "lake formation", "redshift",
        ],
    ),
    (
        Compute,
        &[
            "ec2", "lambda", "ecs", "fargate", "batch", "lightsail", "elastic beanstalk",
            "app runner", "outposts", "wavelength",
        ],
    ),
    (
        Databases,
        &[
            "rds", "dynamodb", "elasticache", "neptune", "documentdb", "keyspaces", "qldb",
            "timestream", "aurora",
        ],
    ),
    (
        DeveloperTools,
        &[
            "codecommit", "codebuild", "codedeploy", "codepipeline", "codestar", "cloud9",
            "x-ray", "codeartifact", "codeguru",
        ],
    ),
    (
        ManagementAndGovernance,
        &[
            "cloudwatch", "cloudtrail", "config", "systems manager", "cloudformation",
            "service catalog", "trusted advisor", "well-architected", "control tower",
            "organizations", "resource groups",
        ],
    ),
    (
        Networking,
        &[
            "vpc", "cloudfront", "route 53", "direct connect", "global accelerator",
            "api gateway", "app mesh", "cloud map", "transit gateway", "elastic load balancing",
        ],
    ),
    (
        Security,
        &[
            "iam", "cognito", "guardduty", "inspector", "macie", "shield", "waf",
            "secrets manager", "certificate manager", "key management", "security hub",
            "detective", "firewall manager",
        ],
    ),
    (
        Storage,
        &[
            "s3", "ebs", "efs", "fsx", "storage gateway", "backup", "datasync", "snow family",
            "s3 glacier",
        ],
    ),
]);

pub const AZURE_CATEGORIES: CategoryRules = CategoryRules::new(&[
    (
        AiAndMachineLearning,
        &[
            "cognitive", "machine learning", "bot", "ai", "openai", "applied ai",
            "form recognizer", "translator", "speech", "language", "vision",
        ],
    ),
    (
        Analytics,
        &[
            "data factory", "synapse", "databricks", "analytics", "hdinsight",
            "stream analytics", "data lake", "purview", "power bi",
        ],
    ),
    (
        Compute,
        &[
            "virtual machine", "app service", "function", "container", "kubernetes", "compute",
            "batch", "service fabric", "cloud services",
        ],
    ),
    (
        Databases,
        &[
            "sql", "database", "cosmos", "redis", "cache", "mysql", "postgresql", "mariadb",
            "managed instance",
        ],
    ),
    (
        DeveloperTools,
        &["devops", "visual studio", "github", "app configuration", "notification hubs"],
    ),
    (
        ManagementAndGovernance,
        &[
            "monitor", "log analytics", "automation", "backup", "site recovery", "policy",
            "blueprints", "cost management", "advisor",
        ],
    ),
    (
        Networking,
        &[
            "network", "load balancer", "vpn", "cdn", "firewall", "dns", "virtual wan",
            "peering", "expressroute", "bastion",
        ],
    ),
    (
        Security,
        &[
            "key vault", "active directory", "security", "sentinel", "defender",
            "information protection", "privileged identity",
        ],
    ),
    (
        Storage,
        &["storage", "blob", "disk", "file", "data box", "archive"],
    ),
]);

pub const GCP_CATEGORIES: CategoryRules = CategoryRules::new(&[
    (
        AiAndMachineLearning,
        &[
            "ai platform", "vertex", "automl", "vision", "natural language", "translation",
            "speech", "dialogflow", "recommendations",
        ],
    ),
    (
        Analytics,
        &[
            "bigquery", "dataflow", "dataproc", "pubsub", "datastore", "analytics",
            "data studio", "looker",
        ],
    ),
    (
        Compute,
        &[
            "compute engine", "kubernetes", "gke", "app engine", "cloud run", "cloud functions",
            "compute", "instances",
        ],
    ),
    (
        Databases,
        &[
            "cloud sql", "firestore", "bigtable", "spanner", "memorystore", "database", "sql",
        ],
    ),
    (
        DeveloperTools,
        &[
            "cloud build", "source repositories", "cloud shell", "deployment manager",
            "container registry", "artifact registry",
        ],
    ),
    (
        ManagementAndGovernance,
        &[
            "cloud logging", "cloud monitoring", "cloud trace", "cloud profiler",
            "resource manager", "iam", "logging", "monitoring",
        ],
    ),
    (
        Networking,
        &[
            "vpc", "cloud load balancing", "cloud cdn", "cloud dns", "cloud nat", "network",
            "load balancing", "cdn",
        ],
    ),
    (
        Security,
        &[
            "cloud kms", "cloud iam", "security", "identity", "access management",
            "binary authorization", "cloud security scanner",
        ],
    ),
    (
        Storage,
        &["cloud storage", "persistent disk", "filestore", "cloud backup", "storage", "disk"],
    ),
]);

pub const AWS_SUBCATEGORIES: SubcategoryRules = SubcategoryRules::new(&[
    (&["ec2"], "Virtual Machines"),
    (&["s3"], "Object Storage"),
    (&["lambda"], "Serverless Functions"),
    (&["rds"], "Relational Database"),
    (&["dynamodb"], "NoSQL Database"),
    (&["cloudfront"], "Content Delivery Network"),
    (&["eks", "kubernetes"], "Container Orchestration"),
]);

pub const GCP_SUBCATEGORIES: SubcategoryRules = SubcategoryRules::new(&[
    (&["compute engine"], "Virtual Machines"),
    (&["cloud storage"], "Object Storage"),
    (&["cloud functions"], "Serverless Functions"),
    (&["gke", "kubernetes"], "Container Orchestration"),
    (&["bigquery"], "Data Warehouse"),
    (&["cloud sql"], "Managed Database"),
]);

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_aws_classification() {
        assert_eq!(AWS_CATEGORIES.classify("Amazon EC2"), Compute);
        assert_eq!(AWS_CATEGORIES.classify("Amazon SageMaker"), AiAndMachineLearning);
        assert_eq!(AWS_CATEGORIES.classify("AmazonRDS"), Databases);
        assert_eq!(AWS_CATEGORIES.classify("Amazon Simple Storage Service (S3)"), Storage);
        assert_eq!(AWS_CATEGORIES.classify("Something New"), Other);
    }

    #[test]
    fn test_earlier_bucket_wins_on_overlap() {
        // "redshift" (Analytics) is listed before "rds" (Databases)
        assert_eq!(AWS_CATEGORIES.classify("Amazon Redshift RDS Bridge"), Analytics);
        // Databases precede Storage for Azure
        assert_eq!(AZURE_CATEGORIES.classify("SQL Database Storage"), Databases);
        // GCP BigQuery storage stays Analytics
        assert_eq!(GCP_CATEGORIES.classify("BigQuery Storage API"), Analytics);
    }

    #[test]
    fn test_azure_substring_matching_is_literal() {
        // "ai" is an AI keyword and matches inside "container"
        assert_eq!(AZURE_CATEGORIES.classify("Container Instances"), AiAndMachineLearning);
        assert_eq!(AZURE_CATEGORIES.classify("Virtual Network"), Networking);
        assert_eq!(AZURE_CATEGORIES.classify("Key Vault"), Security);
    }

    #[test]
    fn test_gcp_classification() {
        assert_eq!(GCP_CATEGORIES.classify("Compute Engine"), Compute);
        assert_eq!(GCP_CATEGORIES.classify("Cloud Storage"), Storage);
        assert_eq!(GCP_CATEGORIES.classify("Vertex AI"), AiAndMachineLearning);
        assert_eq!(GCP_CATEGORIES.classify("Cloud DNS"), Networking);
    }

    #[test]
    fn test_subcategories() {
        assert_eq!(AWS_SUBCATEGORIES.classify("Amazon EC2"), Some("Virtual Machines"));
        assert_eq!(AWS_SUBCATEGORIES.classify("Amazon EKS"), Some("Container Orchestration"));
        assert_eq!(GCP_SUBCATEGORIES.classify("BigQuery"), Some("Data Warehouse"));
        assert_eq!(GCP_SUBCATEGORIES.classify("Cloud Pub/Sub"), None);
    }
}

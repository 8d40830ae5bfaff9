//! 表注册表
//!
//! 每张受管表在启动时从清单注册一次，注册项携带归属规则、敏感类别和 id 解析方式。
//! 审计记录器、隔离策略和分区管理器都只认注册表里的表，未注册的表既不审计也不可访问。

use std::collections::HashMap;
use std::sync::Arc;

use config::{Config, File, FileFormat};
use uuid::Uuid;

use crate::models::anonymization::EntityClass;
use crate::models::table::{
    is_valid_identifier, IdSource, MembershipSpec, PartitionSpec, TableManifest, TableManifestEntry,
    TenantLink,
};
use crate::models::Row;

/// 自定义 id 解析函数
pub type IdAccessor = Arc<dyn Fn(&Row) -> Option<Uuid> + Send + Sync>;

/// 注册表错误
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    #[error("invalid SQL identifier '{0}'")]
    InvalidIdentifier(String),

    #[error("table '{0}' is registered twice")]
    DuplicateTable(String),

    #[error("tenant link of '{table}' cannot be resolved: {reason}")]
    UnresolvableLink { table: String, reason: String },

    #[error("invalid registration for '{table}': {reason}")]
    InvalidEntry { table: String, reason: String },

    #[error("table '{0}' is not registered")]
    UnknownTable(String),

    #[error("failed to load table manifest: {0}")]
    Load(String),
}

impl From<config::ConfigError> for RegistryError {
    fn from(e: config::ConfigError) -> Self {
        RegistryError::Load(e.to_string())
    }
}

/// 单张表的注册项
#[derive(Clone)]
pub struct TableRegistration {
    entry: TableManifestEntry,
    principal_accessor: Option<IdAccessor>,
    child_accessor: Option<IdAccessor>,
}

impl std::fmt::Debug for TableRegistration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TableRegistration")
            .field("entry", &self.entry)
            .field("custom_principal_accessor", &self.principal_accessor.is_some())
            .field("custom_child_accessor", &self.child_accessor.is_some())
            .finish()
    }
}

impl TableRegistration {
    pub fn new(entry: TableManifestEntry) -> Self {
        Self {
            entry,
            principal_accessor: None,
            child_accessor: None,
        }
    }

    /// 覆盖清单中的主体 id 解析方式
    pub fn with_principal_accessor<F>(mut self, accessor: F) -> Self
    where
        F: Fn(&Row) -> Option<Uuid> + Send + Sync + 'static,
    {
        self.principal_accessor = Some(Arc::new(accessor));
        self
    }

    /// 覆盖清单中的儿童 id 解析方式
    pub fn with_child_accessor<F>(mut self, accessor: F) -> Self
    where
        F: Fn(&Row) -> Option<Uuid> + Send + Sync + 'static,
    {
        self.child_accessor = Some(Arc::new(accessor));
        self
    }

    pub fn name(&self) -> &str {
        &self.entry.table
    }

    pub fn entry(&self) -> &TableManifestEntry {
        &self.entry
    }

    pub fn tenant_link(&self) -> &TenantLink {
        &self.entry.tenant_link
    }

    pub fn sensitive_class(&self) -> Option<EntityClass> {
        self.entry.sensitive_class
    }

    pub fn audit_enabled(&self) -> bool {
        self.entry.audit_enabled
    }

    pub fn force_isolation(&self) -> bool {
        self.entry.force_isolation
    }

    pub fn reportable(&self) -> bool {
        self.entry.reportable
    }

    pub fn id_column(&self) -> &str {
        &self.entry.id_column
    }

    pub fn partition(&self) -> Option<&PartitionSpec> {
        self.entry.partition.as_ref()
    }

    /// 行主键
    pub fn record_id(&self, row: &Row) -> Option<Uuid> {
        uuid_field(row, &self.entry.id_column)
    }

    /// 行归属的主体 id（自定义解析优先）
    pub fn principal_of(&self, row: &Row) -> Option<Uuid> {
        match &self.principal_accessor {
            Some(accessor) => accessor(row),
            None => self.resolve(&self.entry.principal, row),
        }
    }

    /// 行关联的儿童 id
    pub fn child_of(&self, row: &Row) -> Option<Uuid> {
        match &self.child_accessor {
            Some(accessor) => accessor(row),
            None => self.resolve(&self.entry.child, row),
        }
    }

    /// 归属列上的值：直接关联时是家庭 id，经由父实体关联时是父实体 id
    pub fn link_value(&self, row: &Row) -> Option<Uuid> {
        match &self.entry.tenant_link {
            TenantLink::Direct { column } | TenantLink::Via { column, .. } => uuid_field(row, column),
            TenantLink::Global => None,
        }
    }

    fn resolve(&self, source: &IdSource, row: &Row) -> Option<Uuid> {
        match source {
            IdSource::Column { name } => uuid_field(row, name),
            IdSource::RowId => self.record_id(row),
            IdSource::None => None,
        }
    }
}

fn uuid_field(row: &Row, column: &str) -> Option<Uuid> {
    row.get(column)?.as_str()?.parse().ok()
}

/// 所有受管表的注册表
#[derive(Debug, Clone)]
pub struct TableRegistry {
    tables: HashMap<String, Arc<TableRegistration>>,
    membership: MembershipSpec,
    activity_child_table: Option<String>,
}

impl TableRegistry {
    /// 从 TOML 清单文件加载
    pub fn load(path: &str) -> Result<Self, RegistryError> {
        let manifest: TableManifest = Config::builder()
            .add_source(File::new(path, FileFormat::Toml))
            .build()?
            .try_deserialize()?;

        let registry = Self::from_manifest(manifest)?;
        tracing::info!(
            path = %path,
            tables = registry.tables.len(),
            "Table manifest loaded"
        );
        Ok(registry)
    }

    /// 从 TOML 字符串加载
    pub fn from_toml_str(manifest: &str) -> Result<Self, RegistryError> {
        let manifest: TableManifest = Config::builder()
            .add_source(File::from_str(manifest, FileFormat::Toml))
            .build()?
            .try_deserialize()?;
        Self::from_manifest(manifest)
    }

    pub fn from_manifest(manifest: TableManifest) -> Result<Self, RegistryError> {
        validate_membership(&manifest.membership)?;

        let mut tables = HashMap::with_capacity(manifest.tables.len());
        for entry in manifest.tables {
            validate_identifiers(&entry)?;
            if tables.contains_key(&entry.table) {
                return Err(RegistryError::DuplicateTable(entry.table));
            }
            tables.insert(entry.table.clone(), Arc::new(TableRegistration::new(entry)));
        }

        let registry = Self {
            tables,
            membership: manifest.membership,
            activity_child_table: manifest.activity_child_table,
        };

        // 所有表都注册完之后再检查父实体，清单中的顺序无关紧要
        for registration in registry.tables.values() {
            registry.validate_links(registration.entry())?;
        }

        if let Some(child_table) = &registry.activity_child_table {
            match registry.tables.get(child_table).map(|r| r.tenant_link()) {
                Some(TenantLink::Direct { .. }) => {}
                Some(_) => {
                    return Err(RegistryError::InvalidEntry {
                        table: child_table.clone(),
                        reason: "activity child table must link directly to a family".to_string(),
                    })
                }
                None => return Err(RegistryError::UnknownTable(child_table.clone())),
            }
        }

        Ok(registry)
    }

    /// 注册或替换一张表（例如为其挂上自定义 id 解析函数）
    pub fn register(&mut self, registration: TableRegistration) -> Result<(), RegistryError> {
        validate_identifiers(registration.entry())?;
        self.validate_links(registration.entry())?;
        self.tables
            .insert(registration.name().to_string(), Arc::new(registration));
        Ok(())
    }

    pub fn get(&self, table: &str) -> Option<Arc<TableRegistration>> {
        self.tables.get(table).cloned()
    }

    pub fn require(&self, table: &str) -> Result<Arc<TableRegistration>, RegistryError> {
        self.get(table)
            .ok_or_else(|| RegistryError::UnknownTable(table.to_string()))
    }

    pub fn tables(&self) -> impl Iterator<Item = &Arc<TableRegistration>> {
        self.tables.values()
    }

    /// 声明了分区的表
    pub fn partitioned(&self) -> impl Iterator<Item = &Arc<TableRegistration>> {
        self.tables.values().filter(|r| r.partition().is_some())
    }

    pub fn membership(&self) -> &MembershipSpec {
        &self.membership
    }

    pub fn activity_child_table(&self) -> Option<Arc<TableRegistration>> {
        self.activity_child_table
            .as_deref()
            .and_then(|table| self.get(table))
    }

    pub fn len(&self) -> usize {
        self.tables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }

    fn validate_links(&self, entry: &TableManifestEntry) -> Result<(), RegistryError> {
        if let TenantLink::Via { parent_table, .. } = &entry.tenant_link {
            if parent_table == &entry.table {
                return Err(RegistryError::UnresolvableLink {
                    table: entry.table.clone(),
                    reason: "a table cannot be its own parent".to_string(),
                });
            }
            match self.tables.get(parent_table).map(|p| p.tenant_link()) {
                Some(TenantLink::Direct { .. }) => {}
                Some(_) => {
                    return Err(RegistryError::UnresolvableLink {
                        table: entry.table.clone(),
                        reason: format!("parent '{}' does not link directly to a family", parent_table),
                    })
                }
                None => {
                    return Err(RegistryError::UnresolvableLink {
                        table: entry.table.clone(),
                        reason: format!("parent '{}' is not registered", parent_table),
                    })
                }
            }
        }

        if entry.reportable && entry.sensitive_class.is_none() {
            return Err(RegistryError::InvalidEntry {
                table: entry.table.clone(),
                reason: "reportable tables must declare a sensitive_class".to_string(),
            });
        }

        Ok(())
    }
}

fn check_identifier(name: &str) -> Result<(), RegistryError> {
    if is_valid_identifier(name) {
        Ok(())
    } else {
        Err(RegistryError::InvalidIdentifier(name.to_string()))
    }
}

fn validate_membership(spec: &MembershipSpec) -> Result<(), RegistryError> {
    check_identifier(&spec.table)?;
    check_identifier(&spec.tenant_column)?;
    check_identifier(&spec.principal_column)?;
    check_identifier(&spec.left_column)
}

fn validate_identifiers(entry: &TableManifestEntry) -> Result<(), RegistryError> {
    check_identifier(&entry.table)?;
    check_identifier(&entry.id_column)?;

    match &entry.tenant_link {
        TenantLink::Direct { column } => check_identifier(column)?,
        TenantLink::Via {
            column,
            parent_table,
            parent_key,
            parent_tenant_column,
            parent_archived_column,
            parent_active_column,
        } => {
            check_identifier(column)?;
            check_identifier(parent_table)?;
            check_identifier(parent_key)?;
            check_identifier(parent_tenant_column)?;
            if let Some(column) = parent_archived_column {
                check_identifier(column)?;
            }
            if let Some(column) = parent_active_column {
                check_identifier(column)?;
            }
        }
        TenantLink::Global => {}
    }

    for source in [&entry.principal, &entry.child] {
        if let IdSource::Column { name } = source {
            check_identifier(name)?;
        }
    }

    if let Some(partition) = &entry.partition {
        check_identifier(&partition.column)?;
    }

    Ok(())
}

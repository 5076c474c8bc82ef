use sea_orm_migration::{prelude::*, schema::*};

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        // Create policies table
        manager
            .create_table(
                Table::create()
                    .table(Policies::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(Policies::Id)
                            .string()
                            .not_null()
                            .primary_key(),
                    )
                    .col(integer(Policies::PolicyNumber))
                    .col(string(Policies::Name))
                    .col(string_null(Policies::Description))
                    .col(string(Policies::Status))
                    .col(
                        ColumnDef::new(Policies::Revision)
                            .big_integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(Policies::AllowCount)
                            .big_integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(Policies::DenyCount)
                            .big_integer()
                            .not_null()
                            .default(0),
                    )
                    .col(big_integer(Policies::CreatedAt))
                    .col(big_integer(Policies::UpdatedAt))
                    .to_owned(),
            )
            .await?;

        // policy_number is the human-facing label and must stay unique
        manager
            .create_index(
                Index::create()
                    .if_not_exists()
                    .name("idx_policies_policy_number")
                    .table(Policies::Table)
                    .col(Policies::PolicyNumber)
                    .unique()
                    .to_owned(),
            )
            .await?;

        // Create policy_rules table
        manager
            .create_table(
                Table::create()
                    .table(PolicyRules::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(PolicyRules::Id)
                            .string()
                            .not_null()
                            .primary_key(),
                    )
                    .col(string(PolicyRules::PolicyId))
                    .col(string(PolicyRules::Effect))
                    .col(string(PolicyRules::Resource))
                    .col(string(PolicyRules::Action))
                    .col(text_null(PolicyRules::Conditions))
                    .col(big_integer(PolicyRules::Seq))
                    .col(big_integer(PolicyRules::CreatedAt))
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_policy_rules_policy")
                            .from(PolicyRules::Table, PolicyRules::PolicyId)
                            .to(Policies::Table, Policies::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .if_not_exists()
                    .name("idx_policy_rules_policy_order")
                    .table(PolicyRules::Table)
                    .col(PolicyRules::PolicyId)
                    .col(PolicyRules::CreatedAt)
                    .col(PolicyRules::Seq)
                    .to_owned(),
            )
            .await?;

        // Create policy_bindings table
        manager
            .create_table(
                Table::create()
                    .table(PolicyBindings::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(PolicyBindings::Id)
                            .string()
                            .not_null()
                            .primary_key(),
                    )
                    .col(string(PolicyBindings::PolicyId))
                    .col(string(PolicyBindings::SubjectType))
                    .col(string(PolicyBindings::SubjectId))
                    .col(big_integer(PolicyBindings::CreatedAt))
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_policy_bindings_policy")
                            .from(PolicyBindings::Table, PolicyBindings::PolicyId)
                            .to(Policies::Table, Policies::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        // A policy may be bound to a subject at most once
        manager
            .create_index(
                Index::create()
                    .if_not_exists()
                    .name("idx_policy_bindings_unique")
                    .table(PolicyBindings::Table)
                    .col(PolicyBindings::PolicyId)
                    .col(PolicyBindings::SubjectType)
                    .col(PolicyBindings::SubjectId)
                    .unique()
                    .to_owned(),
            )
            .await?;

        // Decision path looks bindings up by subject
        manager
            .create_index(
                Index::create()
                    .if_not_exists()
                    .name("idx_policy_bindings_subject")
                    .table(PolicyBindings::Table)
                    .col(PolicyBindings::SubjectType)
                    .col(PolicyBindings::SubjectId)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(PolicyBindings::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(PolicyRules::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(Policies::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum Policies {
    Table,
    Id,
    PolicyNumber,
    Name,
    Description,
    Status,
    Revision,
    AllowCount,
    DenyCount,
    CreatedAt,
    UpdatedAt,
}

#[derive(DeriveIden)]
enum PolicyRules {
    Table,
    Id,
    PolicyId,
    Effect,
    Resource,
    Action,
    Conditions,
    Seq,
    CreatedAt,
}

#[derive(DeriveIden)]
enum PolicyBindings {
    Table,
    Id,
    PolicyId,
    SubjectType,
    SubjectId,
    CreatedAt,
}
